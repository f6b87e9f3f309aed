//! Output buffer with carriage-return coalescing.
//!
//! Distinct lines never lose their ordering; only redraw fragments (text
//! ending in a carriage return with no completed line anywhere in sight)
//! may be superseded by a later fragment of the same kind.

/// Ordered accumulator of pending text chunks.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    chunks: Vec<String>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Appends a chunk and reports whether the buffer was empty immediately
    /// before, which is the signal to arm the delayed flush.
    ///
    /// If the new text carries a redraw signal and no chunk anywhere, old
    /// or new, contains a newline, everything buffered so far is discarded:
    /// without a completed line only the latest frame is meaningful.
    pub fn push(&mut self, text: String) -> bool {
        let was_empty = self.chunks.is_empty();
        if is_redraw(&text)
            && !text.contains('\n')
            && !self.chunks.iter().any(|chunk| chunk.contains('\n'))
        {
            self.chunks.clear();
        }
        self.chunks.push(text);
        was_empty
    }

    /// Drains the buffer into one chronologically ordered string.
    pub fn take(&mut self) -> String {
        self.chunks.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

/// Pure pattern check: a carriage return followed by anything that is not
/// another carriage return signals an in-place redraw. A trailing carriage
/// return counts too: the overwriting character simply arrives with the
/// next frame.
fn is_redraw(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'\r' && bytes.get(i + 1).map_or(true, |&next| next != b'\r')
    })
}
