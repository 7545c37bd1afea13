/// Split `input` on `delimiter`, keeping empty tokens between adjacent
/// delimiters. An empty input yields a single empty token.
pub fn tokenize(input: &str, delimiter: char) -> Vec<String> {
    input.split(delimiter).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::tokenize;

    #[test]
    fn empty_input_yields_one_empty_token() {
        assert_eq!(tokenize("", ' '), vec![String::new()]);
    }

    #[test]
    fn splits_on_spaces() {
        assert_eq!(
            tokenize("hello world more tokens", ' '),
            vec!["hello", "world", "more", "tokens"]
        );
    }

    #[test]
    fn splits_breakpoint_locations() {
        assert_eq!(tokenize("main.cpp:25", ':'), vec!["main.cpp", "25"]);
    }

    #[test]
    fn preserves_empty_tokens() {
        assert_eq!(tokenize("a::b", ':'), vec!["a", "", "b"]);
        assert_eq!(tokenize(" x ", ' '), vec!["", "x", ""]);
    }
}
