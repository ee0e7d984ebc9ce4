use std::fmt;

/// A location in the original shader text, used for diagnostics.
///
/// Line 0 means "no location"; builders that synthesize programs without
/// text positions leave sources defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Source {
    pub line: u32,
    pub col: u32,
}

impl Source {
    pub fn new(line: u32, col: u32) -> Self {
        Source { line, col }
    }

    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}
