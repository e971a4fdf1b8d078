//! ANSI escapes and table output for listings.
// See also
// https://en.wikipedia.org/wiki/ANSI_escape_code#Escape_sequences
use std::io::Write;
use tabwriter::TabWriter;

/// Cease all formatting
pub const END: &str = "\u{1b}[0m";

/// Bold text
pub const BOLD: &str = "\u{1b}[1m";

/// Lay out tab-separated `rows` under `header`.
///
/// On a terminal the columns are aligned with elastic tabstops and the header
/// is bold. Anywhere else it stays tab-separated so it can be piped on.
pub fn render_table(header: &str, rows: &[String], pretty: bool) -> std::io::Result<String> {
    if !pretty {
        let mut out = String::from(header);
        for r in rows {
            out.push('\n');
            out.push_str(r);
        }
        return Ok(out);
    }

    let mut tw = TabWriter::new(vec![]);
    writeln!(&mut tw, "{}", header)?;
    for r in rows {
        writeln!(&mut tw, "{}", r)?;
    }
    tw.flush()?;
    let bytes = tw
        .into_inner()
        .map_err(|e| std::io::Error::new(e.error().kind(), e.error().to_string()))?;
    let aligned = String::from_utf8(bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let aligned = aligned.trim_end_matches('\n');
    let (hline, rest) = aligned.split_at(aligned.find('\n').unwrap_or(aligned.len()));
    Ok(format!("{}{}{}{}", BOLD, hline, END, rest))
}

/// Whether standard output is a terminal.
pub fn stdout_is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}
