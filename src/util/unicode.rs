use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

fn grapheme_width(g: &str) -> usize {
    if g == "\t" { 4 } else { UnicodeWidthStr::width(g) }
}

/// Terminal cells `s` occupies. Tabs count as 4.
pub fn display_width(s: &str) -> usize {
    s.graphemes(true).map(grapheme_width).sum()
}

/// Cut `s` to at most `max_cells`, ending in `…` when something was cut.
/// Never splits a grapheme cluster.
pub fn truncate_to_width(s: &str, max_cells: usize) -> String {
    if max_cells == 0 {
        return String::new();
    }
    if display_width(s) <= max_cells {
        return s.to_string();
    }
    let budget = max_cells - 1;
    let mut width = 0;
    let mut out = String::new();
    for g in s.graphemes(true) {
        let gw = grapheme_width(g);
        if width + gw > budget {
            break;
        }
        width += gw;
        out.push_str(g);
    }
    out.push('\u{2026}');
    out
}

/// Truncate or right-pad `s` with spaces to exactly `cells` wide.
pub fn fit_to_width(s: &str, cells: usize) -> String {
    let mut out = truncate_to_width(s, cells);
    let width = display_width(&out);
    out.extend(std::iter::repeat_n(' ', cells.saturating_sub(width)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(display_width("report"), 6);
        assert_eq!(display_width("日程表"), 6);
        assert_eq!(display_width("ship 🚀"), 7);
        assert_eq!(display_width("re\u{0301}sume\u{0301}"), 6);
        assert_eq!(display_width("a\tb"), 6);
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate_to_width("quarterly review", 10), "quarterly\u{2026}");
        assert_eq!(truncate_to_width("日程表を作る", 5), "日程\u{2026}");
        assert_eq!(truncate_to_width("short", 10), "short");
        assert_eq!(truncate_to_width("short", 1), "\u{2026}");
        assert_eq!(truncate_to_width("short", 0), "");
    }

    #[test]
    fn fitting() {
        assert_eq!(fit_to_width("ab", 4), "ab  ");
        assert_eq!(fit_to_width("日程", 5), "日程 ");
        assert_eq!(fit_to_width("abcdef", 4), "abc\u{2026}");
        // A wide char that does not fit leaves a gap that padding fills
        assert_eq!(display_width(&fit_to_width("日程表", 4)), 4);
    }
}
