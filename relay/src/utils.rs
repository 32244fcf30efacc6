/// Decode the HTML entities trivia and headline APIs leave in their text.
///
/// Covers the whole HTML5 named entity table plus decimal and hex numeric
/// references; anything unrecognised is left as written.
pub fn decode_html_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_and_numeric_entities() {
        assert_eq!(decode_html_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_html_entities("It&#039;s &quot;fine&quot;"), "It's \"fine\"");
        assert_eq!(decode_html_entities("&#x41;BC"), "ABC");
        assert_eq!(decode_html_entities("Pok&eacute;mon"), "Pokémon");
    }

    #[test]
    fn decodes_accented_capitals_and_punctuation() {
        assert_eq!(decode_html_entities("&Eacute;cole"), "École");
        assert_eq!(decode_html_entities("cr&egrave;me br&ucirc;l&eacute;e"), "crème brûlée");
        assert_eq!(decode_html_entities("&Uuml;ber &ccedil;a"), "Über ça");
        assert_eq!(decode_html_entities("&euro;5 &ndash; &ecirc;tre"), "€5 – être");
    }

    #[test]
    fn leaves_unknown_entities_alone() {
        assert_eq!(decode_html_entities("&bogus; & more"), "&bogus; & more");
    }
}
