use unicode_normalization::UnicodeNormalization;

/// Longest file name, extension included, that will be written to disk.
pub const MAX_FILE_NAME_LEN: usize = 250;

/// Turns arbitrary text (page titles, headers, header values) into a name that is
/// safe to use as a file or directory name.
///
/// The text is NFKD normalized, anything that isn't plain ASCII is dropped
/// (accents fall away from their base letters), then every character outside
/// `[A-Za-z0-9_-()[].,` and space is removed. Names longer than
/// [`MAX_FILE_NAME_LEN`] lose characters from the end of the stem, the
/// extension always survives.
///
/// The result may be empty, callers decide what to do about that.
pub fn sanitize_file_name(text: &str) -> String {
    let cleaned: String = text
        .nfkd()
        .filter(|c| c.is_ascii() && is_allowed(*c))
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.len() <= MAX_FILE_NAME_LEN {
        return cleaned.to_string();
    }

    let (stem, ext) = split_extension(cleaned);
    if ext.len() > MAX_FILE_NAME_LEN {
        return cleaned[..MAX_FILE_NAME_LEN].trim_end().to_string();
    }
    // Everything is ASCII by now, byte offsets are char offsets.
    let keep = MAX_FILE_NAME_LEN - ext.len();
    format!("{}{}", stem[..keep].trim_end(), ext)
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '(' | ')' | '[' | ']' | '.' | ',' | ' ')
}

/// Splits `name` into stem and extension (dot included). Leading dots don't start
/// an extension, so `.bashrc` has none.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => name.split_at(idx),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_allowed(s: &str) -> bool {
        s.chars().all(|c| c.is_ascii() && is_allowed(c))
    }

    #[test]
    fn strips_accents_and_punctuation() {
        assert_eq!(sanitize_file_name("Café Crème"), "Cafe Creme");
        assert_eq!(
            sanitize_file_name("1.2 Introduction: What's new?"),
            "1.2 Introduction Whats new"
        );
        assert_eq!(
            sanitize_file_name("  Week 1 (Part [a], b)  "),
            "Week 1 (Part [a], b)"
        );
    }

    #[test]
    fn drops_characters_without_ascii_form() {
        assert_eq!(sanitize_file_name("講義 Lecture"), "Lecture");
        assert_eq!(sanitize_file_name("αβγ"), "");
        assert_eq!(sanitize_file_name("tab\there/there"), "tabherethere");
    }

    #[test]
    fn long_names_keep_their_extension() {
        let long = format!("{}.mp4", "a".repeat(400));
        let name = sanitize_file_name(&long);
        assert_eq!(name.len(), MAX_FILE_NAME_LEN);
        assert!(name.ends_with(".mp4"));
        assert!(name.starts_with("aaaa"));
    }

    #[test]
    fn truncation_does_not_leave_trailing_spaces() {
        let long = format!("{} {}", "b".repeat(249), "c".repeat(20));
        let name = sanitize_file_name(&long);
        assert_eq!(name, "b".repeat(249));
        assert_eq!(sanitize_file_name(&name), name);
    }

    #[test]
    fn oversized_extension_is_cut_with_the_name() {
        let long = format!("x.{}", "e".repeat(300));
        let name = sanitize_file_name(&long);
        assert_eq!(name.len(), MAX_FILE_NAME_LEN);
        assert_eq!(sanitize_file_name(&name), name);
    }

    #[test]
    fn output_is_whitelisted_bounded_and_idempotent() {
        let samples: Vec<String> = vec![
            "".into(),
            "   ".into(),
            ".hidden".into(),
            "..pdf".into(),
            "Lecture 3 — Ünïcödé & <friends>.pptx".into(),
            "../../etc/passwd".into(),
            "a.b.c.d".into(),
            "name with trailing dot.".into(),
            format!("{}.tar.gz", "ç".repeat(600)),
            format!("{} .pdf", "w ".repeat(200)),
        ];
        for sample in samples.iter() {
            let once = sanitize_file_name(sample);
            assert!(only_allowed(&once), "{once:?}");
            assert!(once.len() <= MAX_FILE_NAME_LEN, "{once:?}");
            assert_eq!(sanitize_file_name(&once), once, "{sample:?}");
        }
    }

    #[test]
    fn splits_extensions_like_a_path() {
        assert_eq!(split_extension("slides.pdf"), ("slides", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
        assert_eq!(split_extension("noext"), ("noext", ""));
    }
}
