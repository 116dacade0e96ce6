//! Word tokenizer applied before restoration
//!
//! Runs of alphanumeric characters form words. An apostrophe or hyphen
//! between two alphanumeric characters stays inside the word ("d'Amico",
//! "Jean-Luc"). Every other non-whitespace character is a token of its own.

/// Split text into word and punctuation tokens
pub fn tokenize(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            current.push(c);
            continue;
        }

        let joins_word = is_joiner(c)
            && !current.is_empty()
            && chars.get(i + 1).is_some_and(|next| next.is_alphanumeric());
        if joins_word {
            current.push(c);
            continue;
        }

        if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        if !c.is_whitespace() {
            tokens.push(c.to_string());
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

fn is_joiner(c: char) -> bool {
    matches!(c, '\'' | '-' | '\u{2019}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_words() {
        assert_eq!(tokenize("Ivan Horvat"), vec!["Ivan", "Horvat"]);
        assert_eq!(tokenize("  sum   "), vec!["sum"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_tokenize_punctuation() {
        assert_eq!(tokenize("Zagreb, 2024."), vec!["Zagreb", ",", "2024", "."]);
        assert_eq!(tokenize("(cevapi)"), vec!["(", "cevapi", ")"]);
    }

    #[test]
    fn test_tokenize_inner_joiners() {
        assert_eq!(tokenize("Kovac-Horvat"), vec!["Kovac-Horvat"]);
        assert_eq!(tokenize("d'Amico"), vec!["d'Amico"]);
        assert_eq!(tokenize("end-"), vec!["end", "-"]);
        assert_eq!(tokenize("-start"), vec!["-", "start"]);
    }

    #[test]
    fn test_tokenize_keeps_diacritics() {
        assert_eq!(tokenize("Šime Ćosić"), vec!["Šime", "Ćosić"]);
    }
}
