use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Letters and digits in any script. `.`, `'` and `-` stay inside a word when
/// they join two word characters (`node.js`, `o'neil`, `front-end`).
static WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{L}\p{N}]+(?:[.'-][\p{L}\p{N}]+)*").expect("word pattern is valid")
});

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|word| word.chars().count() > 2)
}

pub fn tokenize_text(text: &str) -> HashSet<String> {
    words(text).collect()
}

/// Query tokens in order of appearance, without duplicates.
pub fn tokenize_query(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(query).filter(|word| seen.insert(word.clone())).collect()
}
