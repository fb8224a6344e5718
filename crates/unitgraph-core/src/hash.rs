// ABOUTME: Stable FNV-1a content hashing and line splitting shared by every component.
// ABOUTME: Unit ids and cache keys are derived from these hashes, so they must not change between runs.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Hash the line-hash token used for blank (all-whitespace) lines.
pub const EMPTY_LINE_HASH: &str = "empty";

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 64-bit FNV-1a over raw bytes, rendered as 16 lowercase hex digits.
///
/// Not cryptographic; collisions are tolerated. What matters is that the
/// value is identical across runs so unit ids and cache keys stay stable.
pub fn content_hash_bytes(data: &[u8]) -> String {
    format!("{:016x}", fnv1a(data))
}

/// 64-bit FNV-1a over a string, rendered as 16 lowercase hex digits.
pub fn content_hash(content: &str) -> String {
    content_hash_bytes(content.as_bytes())
}

/// Whitespace-insensitive hash of a single line.
///
/// ASCII whitespace is stripped from both ends before hashing; a line that
/// is empty or all whitespace hashes to the literal token `"empty"`.
pub fn line_hash(line: &str) -> String {
    let trimmed = line.trim_matches(|c| c == ' ' || c == '\t' || c == '\r' || c == '\n');
    if trimmed.is_empty() {
        EMPTY_LINE_HASH.to_string()
    } else {
        content_hash(trimmed)
    }
}

/// Split on `\n`; a trailing newline produces no empty tail element.
pub fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = content.split('\n').map(str::to_owned).collect();
    if content.ends_with('\n') {
        lines.pop();
    }
    lines
}

/// Join lines with a single `\n` between elements.
pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

/// Derive the globally unique unit id: `file:start:end:first-8-hash-chars`.
pub fn generate_unit_id(
    file_path: &str,
    start_line: u32,
    end_line: u32,
    content_hash: &str,
) -> String {
    let prefix = &content_hash[..content_hash.len().min(8)];
    format!("{file_path}:{start_line}:{end_line}:{prefix}")
}

/// Milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_vectors() {
        // Published FNV-1a 64-bit vectors.
        assert_eq!(content_hash(""), "cbf29ce484222325");
        assert_eq!(content_hash("a"), "af63dc4c8601ec8c");
    }

    #[test]
    fn content_hash_is_stable_and_padded() {
        let h = content_hash("fn main() {}");
        assert_eq!(h.len(), 16);
        assert_eq!(h, content_hash("fn main() {}"));
        assert_ne!(h, content_hash("fn main() { }"));
    }

    #[test]
    fn line_hash_ignores_surrounding_whitespace() {
        assert_eq!(line_hash("  let x = 1;\t"), line_hash("let x = 1;"));
        assert_ne!(line_hash("let x = 1;"), line_hash("let x = 2;"));
    }

    #[test]
    fn blank_lines_hash_to_empty_token() {
        assert_eq!(line_hash(""), EMPTY_LINE_HASH);
        assert_eq!(line_hash("   \t  "), EMPTY_LINE_HASH);
    }

    #[test]
    fn split_lines_drops_trailing_newline_only() {
        assert_eq!(split_lines("a\nb\nc"), vec!["a", "b", "c"]);
        assert_eq!(split_lines("a\nb\n"), vec!["a", "b"]);
        assert_eq!(split_lines("a\n\n"), vec!["a", ""]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn join_is_inverse_of_split_without_trailing_newline() {
        let text = "one\ntwo\nthree";
        assert_eq!(join_lines(&split_lines(text)), text);
    }

    #[test]
    fn unit_id_uses_hash_prefix() {
        let hash = content_hash("body");
        let id = generate_unit_id("src/app.py", 3, 9, &hash);
        assert_eq!(id, format!("src/app.py:3:9:{}", &hash[..8]));
    }
}
