//! Text output helpers for plans and generated C.

use std::fmt;

/// An indenting writer for loop nests and generated source.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    indent_level: usize,
    indent_str: String,
    at_line_start: bool,
}

impl CodeFormatter {
    pub fn new(indent_str: &str) -> Self {
        Self {
            output: String::new(),
            indent_level: 0,
            indent_str: indent_str.to_string(),
            at_line_start: true,
        }
    }

    /// Two-space indentation.
    pub fn default_indent() -> Self {
        Self::new("  ")
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    pub fn write(&mut self, s: &str) {
        for c in s.chars() {
            if c == '\n' {
                self.output.push('\n');
                self.at_line_start = true;
                continue;
            }
            if self.at_line_start {
                for _ in 0..self.indent_level {
                    self.output.push_str(&self.indent_str);
                }
                self.at_line_start = false;
            }
            self.output.push(c);
        }
    }

    pub fn writeln(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }

    pub fn newline(&mut self) {
        self.write("\n");
    }

    /// `header {`, the indented body, then `}`.
    pub fn block<F: FnOnce(&mut Self)>(&mut self, header: &str, f: F) {
        self.write(header);
        self.writeln(" {");
        self.indent();
        f(self);
        self.dedent();
        self.writeln("}");
    }

    /// A preprocessor line, always written at column zero.
    pub fn directive(&mut self, text: &str) {
        if !self.at_line_start {
            self.newline();
        }
        self.output.push_str(text);
        self.output.push('\n');
        self.at_line_start = true;
    }

    pub fn finish(self) -> String {
        self.output
    }
}

impl fmt::Write for CodeFormatter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

/// Turn a plan name such as `blur.s0.x.loop_min` into a C identifier.
pub fn c_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks() {
        let mut out = CodeFormatter::default_indent();
        out.block("for (int y = 0; y < h; y++)", |out| {
            out.block("for (int x = 0; x < w; x++)", |out| {
                out.writeln("f[x + y * w] = x + y;");
            });
        });
        let text = out.finish();
        assert!(text.contains("  for (int x = 0; x < w; x++) {"));
        assert!(text.contains("    f[x + y * w] = x + y;"));
    }

    #[test]
    fn test_directive_at_column_zero() {
        let mut out = CodeFormatter::default_indent();
        out.block("void f()", |out| {
            out.directive("#pragma omp parallel for");
            out.writeln("g();");
        });
        let text = out.finish();
        assert!(text.contains("\n#pragma omp parallel for\n"));
        assert!(text.contains("  g();"));
    }

    #[test]
    fn test_c_identifier() {
        assert_eq!(c_identifier("blur.s0.x$3"), "blur_s0_x_3");
        assert_eq!(c_identifier("0x"), "_0x");
    }
}
