const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Reasoning(String),
}

/// Splits a text stream into visible text and `<think>…</think>` reasoning.
///
/// Tags may arrive split across deltas; a trailing partial tag is held back
/// until the next delta decides it.
#[derive(Debug, Default)]
pub struct ReasoningExtractor {
    pending: String,
    in_reasoning: bool,
}

impl ReasoningExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) -> Vec<Segment> {
        self.pending.push_str(delta);
        let mut out = Vec::new();

        loop {
            let tag = if self.in_reasoning { CLOSE } else { OPEN };
            if let Some(pos) = self.pending.find(tag) {
                let before: String = self.pending.drain(..pos).collect();
                self.pending.drain(..tag.len());
                self.emit(&mut out, before);
                self.in_reasoning = !self.in_reasoning;
                continue;
            }

            let keep = partial_tag_suffix(&self.pending, tag);
            let ready_len = self.pending.len() - keep;
            let ready: String = self.pending.drain(..ready_len).collect();
            self.emit(&mut out, ready);
            break;
        }

        out
    }

    pub fn finish(&mut self) -> Option<Segment> {
        let rest = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        self.emit(&mut out, rest);
        out.pop()
    }

    fn emit(&self, out: &mut Vec<Segment>, s: String) {
        if s.is_empty() {
            return;
        }
        out.push(if self.in_reasoning {
            Segment::Reasoning(s)
        } else {
            Segment::Text(s)
        });
    }
}

/// Length of the longest suffix of `s` that is a proper prefix of `tag`.
fn partial_tag_suffix(s: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| s.len() >= n && s.is_char_boundary(s.len() - n) && tag.starts_with(&s[s.len() - n..]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_reasoning_across_deltas() {
        let mut x = ReasoningExtractor::new();
        let mut all = Vec::new();
        for delta in ["Hi <thi", "nk>pondering", "</thi", "nk> answer"] {
            all.extend(x.push(delta));
        }
        all.extend(x.finish());
        assert_eq!(
            all,
            vec![
                Segment::Text("Hi ".into()),
                Segment::Reasoning("pondering".into()),
                Segment::Text(" answer".into()),
            ]
        );
    }

    #[test]
    fn lone_angle_bracket_is_text() {
        let mut x = ReasoningExtractor::new();
        assert_eq!(x.push("a <"), vec![Segment::Text("a ".into())]);
        assert_eq!(x.push(" b"), vec![Segment::Text("< b".into())]);
    }
}
