use std::time::Duration;

/// Re-chunks provider text into whole words so output arrives at a steady pace.
///
/// A chunk is a run of non-whitespace followed by its trailing whitespace. Text
/// after the last whitespace is held back until more arrives or `finish` is called.
#[derive(Debug, Default)]
pub struct WordSmoother {
    buffer: String,
}

impl WordSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut chunks = Vec::new();
        loop {
            let Some(end) = next_word_end(&self.buffer) else {
                break;
            };
            let rest = self.buffer.split_off(end);
            chunks.push(std::mem::replace(&mut self.buffer, rest));
        }
        chunks
    }

    /// Whatever is still buffered.
    pub fn finish(&mut self) -> Option<String> {
        (!self.buffer.is_empty()).then(|| std::mem::take(&mut self.buffer))
    }
}

/// Byte offset just past the first `\S+\s+` match, if the whitespace run is complete.
fn next_word_end(s: &str) -> Option<usize> {
    let mut seen_word = false;
    let mut in_space = false;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if seen_word {
                in_space = true;
            }
        } else if in_space {
            return Some(i);
        } else {
            seen_word = true;
        }
    }
    None
}

/// Pacing policy applied between smoothed chunks.
#[derive(Debug, Clone, Copy)]
pub struct Smoothing {
    pub delay: Duration,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(20),
        }
    }
}
