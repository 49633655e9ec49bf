//! Strain-name normalization shared by the stock index and genetics merger.

/// Normalizes a strain name into an index key.
///
/// Lower-cases, folds Latin diacritics to ASCII, turns punctuation into
/// word breaks and collapses whitespace, so `"Gelato #33"`, `"gelato 33"`
/// and `"GÉLATO-33 "` share a key.
pub fn normalize_strain_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut pending_space = false;

    let push = |c: char, key: &mut String, pending_space: &mut bool| {
        if c.is_alphanumeric() {
            if *pending_space && !key.is_empty() {
                key.push(' ');
            }
            *pending_space = false;
            key.push(c);
        } else if c != '\'' && c != '\u{2019}' {
            // apostrophes vanish so "Girl's" matches "Girls"
            *pending_space = true;
        }
    };

    for ch in raw.chars().flat_map(char::to_lowercase) {
        match fold_diacritic(ch) {
            Some(folded) => {
                for c in folded.chars() {
                    push(c, &mut key, &mut pending_space);
                }
            }
            None => push(ch, &mut key, &mut pending_space),
        }
    }

    key
}

/// Slug form used as the genetics record key (`og-kush`, `gelato-33`).
pub fn strain_slug(raw: &str) -> String {
    normalize_strain_key(raw).replace(' ', "-")
}

fn fold_diacritic(ch: char) -> Option<&'static str> {
    let folded = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'č' => "c",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'ī' => "i",
        'ñ' | 'ń' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' => "o",
        'œ' => "oe",
        'ß' => "ss",
        'š' | 'ś' => "s",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' => "u",
        'ý' | 'ÿ' => "y",
        'ž' | 'ź' | 'ż' => "z",
        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_and_padding_do_not_change_the_key() {
        assert_eq!(normalize_strain_key("gelato"), "gelato");
        assert_eq!(normalize_strain_key("Gelato"), "gelato");
        assert_eq!(normalize_strain_key("GELATO "), "gelato");
    }

    #[test]
    fn diacritics_and_punctuation_fold_away() {
        assert_eq!(normalize_strain_key("GÉLATO-33 "), "gelato 33");
        assert_eq!(normalize_strain_key("Gelato #33"), "gelato 33");
        assert_eq!(normalize_strain_key("  Girl's   Scout.Cookies!"), "girls scout cookies");
        assert_eq!(normalize_strain_key("MÜV Kush"), "muv kush");
    }

    #[test]
    fn slug_joins_words_with_hyphens() {
        assert_eq!(strain_slug("OG Kush (Phenotype #2)"), "og-kush-phenotype-2");
        assert_eq!(strain_slug("***"), "");
    }
}
