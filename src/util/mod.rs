/// Wall-clock instant handed to the editing session. Engine code never reads
/// the clock itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Timestamp {
    pub ms: i64,
    /// ISO-8601, as stored in `lastInteractedWith`.
    pub iso: String,
}

impl Timestamp {
    pub fn at(ms: i64, iso: impl Into<String>) -> Self {
        Self { ms, iso: iso.into() }
    }

    pub fn now() -> Self {
        Self {
            ms: now_ms(),
            iso: now_iso(),
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    js_sys::Date::now().round() as i64
}

pub(crate) fn now_iso() -> String {
    js_sys::Date::new_0().to_iso_string().into()
}

/// Converts a DOM selection offset (UTF-16 code units) to a char offset.
/// Offsets inside a surrogate pair round down.
pub(crate) fn utf16_to_char_idx(s: &str, pos_utf16: u32) -> usize {
    let mut acc: u32 = 0;
    for (i, ch) in s.chars().enumerate() {
        let w = ch.len_utf16() as u32;
        if acc + w > pos_utf16 {
            return i;
        }
        acc += w;
    }
    s.chars().count()
}

/// Converts a char offset to a DOM selection offset, clamped to the string.
pub(crate) fn char_to_utf16_idx(s: &str, chars: usize) -> u32 {
    s.chars().take(chars).map(|c| c.len_utf16() as u32).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_offsets_are_identical() {
        assert_eq!(utf16_to_char_idx("Hello", 5), 5);
        assert_eq!(char_to_utf16_idx("Hello", 3), 3);
    }

    #[test]
    fn test_astral_chars_take_two_code_units() {
        let s = "a😀b";
        assert_eq!(char_to_utf16_idx(s, 2), 3);
        assert_eq!(utf16_to_char_idx(s, 3), 2);
        // Inside the surrogate pair.
        assert_eq!(utf16_to_char_idx(s, 2), 1);
        assert_eq!(utf16_to_char_idx(s, 99), 3);
        assert_eq!(char_to_utf16_idx(s, 99), 4);
    }
}
