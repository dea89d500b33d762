use crate::locate::errors::LocateError;
use std::ops::Range;

/// Half-open byte range of one function definition, from the start of its
/// signature through its closing body delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpan {
    pub start: usize,
    pub end: usize,
}

impl FunctionSpan {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Whether `offset` is a valid insertion point inside the span.
    pub fn contains(&self, offset: usize) -> bool {
        (self.start..=self.end).contains(&offset)
    }
}

/// Finds the end of a function body by counting balanced delimiters.
///
/// Every delimiter byte counts, including ones inside string literals or
/// comments. A function containing an unbalanced brace in a literal will be
/// bounded incorrectly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryScanner {
    open: u8,
    close: u8,
}

impl Default for BoundaryScanner {
    fn default() -> Self {
        Self {
            open: b'{',
            close: b'}',
        }
    }
}

impl BoundaryScanner {
    pub fn new(open: u8, close: u8) -> Self {
        Self { open, close }
    }

    /// Offset of the closing delimiter that returns the depth to zero.
    ///
    /// Closing delimiters seen before the first opening one do not end the
    /// scan; depth has to become positive at least once.
    pub fn closing_delimiter(&self, text: &str, start: usize) -> Result<usize, LocateError> {
        let bytes = text.as_bytes();
        if start > bytes.len() {
            return Err(LocateError::UnterminatedFunction { start });
        }

        let mut depth: i64 = 0;
        let mut entered = false;

        for (idx, &byte) in bytes[start..].iter().enumerate() {
            if byte == self.open {
                depth += 1;
                entered = true;
            } else if byte == self.close {
                depth -= 1;
                if entered && depth == 0 {
                    return Ok(start + idx);
                }
            }
        }

        Err(LocateError::UnterminatedFunction { start })
    }

    /// The full span of the function whose signature begins at `start`.
    pub fn span(&self, text: &str, start: usize) -> Result<FunctionSpan, LocateError> {
        let close = self.closing_delimiter(text, start)?;
        Ok(FunctionSpan {
            start,
            end: close + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_body() {
        let text = "int f(void) { return 0; } int g(void) { }";
        let span = BoundaryScanner::default().span(text, 0).unwrap();
        assert_eq!(&text[span.range()], "int f(void) { return 0; }");
    }

    #[test]
    fn test_nested_depth_three_returns_outermost() {
        let text = "int f(int a)\n{\n\tif (a) {\n\t\twhile (a) {\n\t\t\tif (a > 2) { a--; }\n\t\t}\n\t}\n\treturn a;\n}\ntrailer";
        let scanner = BoundaryScanner::default();
        let close = scanner.closing_delimiter(text, 0).unwrap();
        assert_eq!(close, text.rfind('}').unwrap());
        assert!(text[close + 1..].starts_with("\ntrailer"));
    }

    #[test]
    fn test_start_offset_is_respected() {
        let text = "{ } int g(void) { { } }";
        let start = text.find("int g").unwrap();
        let span = BoundaryScanner::default().span(text, start).unwrap();
        assert_eq!(span.start, start);
        assert_eq!(span.end, text.len());
    }

    #[test]
    fn test_unterminated() {
        let text = "int f(void) { if (x) { y(); }";
        let result = BoundaryScanner::default().closing_delimiter(text, 0);
        assert_eq!(result, Err(LocateError::UnterminatedFunction { start: 0 }));
    }

    #[test]
    fn test_no_body_is_unterminated() {
        let result = BoundaryScanner::default().closing_delimiter("int f(void);", 0);
        assert!(matches!(result, Err(LocateError::UnterminatedFunction { .. })));
    }

    #[test]
    fn test_stray_close_before_body_does_not_end_scan() {
        let text = "} int f(void) { }";
        let close = BoundaryScanner::default().closing_delimiter(text, 0);
        // depth goes -1, then 0 on '{' (entered), then -1 on the final '}'
        assert!(matches!(close, Err(LocateError::UnterminatedFunction { .. })));
    }

    #[test]
    fn test_brace_in_string_literal_is_counted() {
        let text = "int f(void) { puts(\"}\"); return 0; }";
        let close = BoundaryScanner::default().closing_delimiter(text, 0).unwrap();
        assert_eq!(close, text.find("}\"").unwrap());
    }

    #[test]
    fn test_custom_delimiters() {
        let text = "(a (b (c)) d) e";
        let scanner = BoundaryScanner::new(b'(', b')');
        assert_eq!(scanner.closing_delimiter(text, 0).unwrap(), 12);
    }

    #[test]
    fn test_span_contains() {
        let span = FunctionSpan { start: 4, end: 10 };
        assert!(span.contains(4));
        assert!(span.contains(10));
        assert!(!span.contains(3));
        assert!(!span.contains(11));
        assert_eq!(span.range(), 4..10);
    }
}
