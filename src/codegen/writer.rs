/// Line-oriented source buffer with block indentation
#[derive(Debug)]
pub struct SourceWriter {
    buf: String,
    depth: usize,
    unit: &'static str,
}

impl SourceWriter {
    pub fn new(unit: &'static str) -> Self {
        Self {
            buf: String::new(),
            depth: 0,
            unit,
        }
    }

    /// Appends one line at the current indentation
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.buf.push_str(self.unit);
            }
            self.buf.push_str(text);
        }
        self.buf.push('\n');
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn finish(self) -> String {
        self.buf
    }
}
