use serde::{Deserialize, Serialize};

/// Source files a program was compiled from.
///
/// Positions in function source maps are offsets into one global space:
/// file `i` covers `base..base + size`. Only used to render readable
/// positions in error traces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileSet {
    pub base: usize,
    pub files: Vec<SourceFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub base: usize,
    pub size: usize,
    /// Offset (relative to `base`) of the first byte of each line.
    pub lines: Vec<usize>,
}

/// Resolved position, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

impl SourceFileSet {
    pub fn new(base: usize) -> Self {
        Self {
            base,
            files: Vec::new(),
        }
    }

    /// Registers a file and returns its base offset.
    pub fn add_file(&mut self, name: impl Into<String>, source: &str) -> usize {
        let base = self.next_base();
        let mut lines = vec![0];
        lines.extend(
            source
                .char_indices()
                .filter(|(_, c)| *c == '\n')
                .map(|(i, _)| i + 1),
        );
        self.files.push(SourceFile {
            name: name.into(),
            base,
            size: source.len(),
            lines,
        });
        base
    }

    fn next_base(&self) -> usize {
        self.files
            .last()
            .map_or(self.base, |f| f.base + f.size + 1)
    }

    pub fn position(&self, pos: usize) -> Option<SourcePosition> {
        let file = self
            .files
            .iter()
            .find(|f| pos >= f.base && pos <= f.base + f.size)?;
        let offset = pos - file.base;
        let line = match file.lines.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = file.lines.get(line).copied().unwrap_or(0);
        Some(SourcePosition {
            file: file.name.clone(),
            line: line + 1,
            column: offset - line_start + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_lookup() {
        let mut set = SourceFileSet::new(1);
        let a = set.add_file("a.em", "x := 1\ny := 2\n");
        let b = set.add_file("b.em", "z");
        assert_eq!(a, 1);
        assert_eq!(b, 1 + 14 + 1);

        let p = set.position(a + 7).unwrap();
        assert_eq!(p.to_string(), "a.em:2:1");
        let p = set.position(a + 2).unwrap();
        assert_eq!((p.line, p.column), (1, 3));
        assert_eq!(set.position(b).unwrap().file, "b.em");
        assert_eq!(set.position(0), None);
    }
}
