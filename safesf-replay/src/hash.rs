//! Prompt hashing for cache keys
//!
//! A 31-multiplier rolling hash over UTF-16 code units, wrapped to a signed
//! 32-bit accumulator and rendered as the base-36 absolute value. Keys written
//! by earlier clients stay addressable because the accumulation runs over the
//! same code units they used. Not a cryptographic hash.

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Normalize query text before hashing: trim, then lower-case
pub fn normalize_prompt(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Hash arbitrary text into a compact base-36 key
pub fn hash_text(text: &str) -> String {
    let mut acc: i32 = 0;
    for unit in text.encode_utf16() {
        acc = acc
            .wrapping_shl(5)
            .wrapping_sub(acc)
            .wrapping_add(i32::from(unit));
    }
    to_base36(i64::from(acc).unsigned_abs())
}

/// Hash the normalized form of a prompt (the cache lookup key)
pub fn prompt_hash(prompt: &str) -> String {
    hash_text(&normalize_prompt(prompt))
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(hash_text(""), "0");
        assert_eq!(hash_text("a"), "2p");
        assert_eq!(hash_text("ab"), "2e9");
        assert_eq!(hash_text("hello"), "1n1e4y");
        assert_eq!(hash_text("is union square safe at night?"), "uykxbx");
    }

    #[test]
    fn test_non_ascii_uses_utf16_units() {
        assert_eq!(hash_text("é"), "6h");
        // surrogate pair
        assert_eq!(hash_text("😀"), "11zz7");
    }

    #[test]
    fn test_deterministic() {
        let text = "Is it safe near the Ferry Building after 10pm?";
        let first = hash_text(text);
        for _ in 0..10 {
            assert_eq!(hash_text(text), first);
        }
    }

    #[test]
    fn test_prompt_hash_normalizes() {
        assert_eq!(
            prompt_hash("  Is Union Square safe at night?\n"),
            prompt_hash("is union square safe at night?")
        );
        assert_eq!(prompt_hash("Is Union Square safe at night?"), "uykxbx");
    }

    #[test]
    fn test_distinct_prompts_do_not_collide() {
        let prompts = [
            "is union square safe at night?",
            "is the mission safe at night?",
            "traffic accidents in tenderloin this month",
            "encampments near union square",
            "what are the safest neighborhoods in sf?",
            "show me dangerous areas in the mission",
        ];
        let mut hashes: Vec<String> = prompts.iter().map(|p| hash_text(p)).collect();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), prompts.len());
    }

    #[test]
    fn test_base36_rendering() {
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(2_147_483_648), "zik0zk");
    }
}
