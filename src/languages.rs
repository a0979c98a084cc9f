//! Language codes accepted in manifests and batch files.

/// ISO 639-2/3 codes (with a few script variants) and their English names.
pub const LANGUAGES: &[(&str, &str)] = &[
    ("aeb", "Tunisian Arabic"),
    ("ces", "Czech"),
    ("zho", "Chinese"),
    ("eng", "English"),
    ("fin", "Finnish"),
    ("deu", "German"),
    ("lav", "Latvian"),
    ("rus", "Russian"),
    ("trk", "Turkish"),
    ("fra", "French"),
    ("hun", "Hungarian"),
    ("plk", "Polish"),
    ("por", "Portuguese"),
    ("ron", "Romanian"),
    ("spa", "Spanish"),
    ("swe", "Swedish"),
    ("ara", "Arabic"),
    ("ita", "Italian"),
    ("jpn", "Japanese"),
    ("kor", "Korean"),
    ("nob", "Norwegian"),
    ("nld", "Dutch"),
    ("cat", "Catalan"),
    ("dan", "Danish"),
    ("hin", "Hindi"),
    ("tha", "Thai"),
    ("ben", "Bengali"),
    ("slk", "Slovak"),
    ("slv", "Slovenian"),
    ("est", "Estonian"),
    ("bul", "Bulgarian"),
    ("ell", "Greek"),
    ("heb", "Hebrew"),
    ("cym", "Welsh"),
    ("ukr", "Ukrainian"),
    ("tel", "Telugu"),
    ("tam", "Tamil"),
    ("isl", "Icelandic"),
    ("hrv", "Croatian"),
    ("lit", "Lithuanian"),
    ("vie", "Vietnamese"),
    ("srp", "Serbian"),
    ("bos", "Bosnian"),
    ("ind", "Indonesian"),
    ("urd", "Urdu"),
    ("acm", "Iraqi Arabic"),
    ("ary", "Moroccan Arabic"),
    ("ayl", "Libyan Arabic"),
    ("ayn", "Yemeni Arabic"),
    ("fas", "Farsi"),
    ("afr", "Afrikaans"),
    ("mlt", "Maltese"),
    ("sin", "Sinhalese"),
    ("smo", "Samoan"),
    ("mlg", "Malagasy"),
    ("swa", "Swahili"),
    ("fij", "Fijian"),
    ("ton", "Tongan"),
    ("guj", "Gujarati"),
    ("kaz", "Kazakh"),
    ("zsm", "Malaysian"),
    ("hat", "Haitian Creole"),
    ("fil", "Filipino"),
    ("tah", "Tahitian"),
    ("mri", "Maori"),
    ("pan", "Punjabi"),
    ("kan", "Kannada"),
    ("mal", "Malayalam"),
    ("mar", "Marathi"),
    ("kat", "Georgian"),
    ("gle", "Irish"),
    ("zho-Hans", "Simplified Chinese"),
    ("zho-Hant", "Traditional Chinese"),
    ("srp-Cyrl", "Serbian"),
    ("srp-Latn", "Serbian"),
    ("asm", "Assamese"),
    ("ori", "Odia"),
    ("aze", "Azerbaijani"),
    ("amh", "Amharic"),
    ("sqi", "Albanian"),
    ("jav", "Javanese"),
    ("sun", "Sundanese"),
    ("hau", "Hausa"),
    ("glg", "Galician"),
    ("mya", "Myanmar"),
    ("ceb", "Cebuano"),
    ("bel", "Belarusian"),
    ("xho", "Xhosa"),
    ("uzb", "Uzbek"),
    ("ltz", "Luxembourgish"),
    ("lao", "Lao"),
    ("khm", "Khmer"),
    ("eus", "Basque"),
    ("hye", "Armenian"),
    ("mon", "Mongolian"),
    ("mkd", "Macedonian"),
    ("som", "Somali"),
    ("tgk", "Tajik"),
    ("kir", "Kyrgyz"),
    ("yid", "Yiddish"),
    ("gla", "Scottish Gaelic"),
    ("epo", "Esperanto"),
    ("lat", "Latin"),
    ("yor", "Yoruba"),
    ("zul", "Zulu"),
    ("ibo", "Igbo"),
    ("tat", "Tatar"),
    ("snd", "Sindhi"),
    ("nya", "Chichewa"),
    ("fry", "Frisian"),
    ("sna", "Shona"),
    ("bak", "Bashkir"),
    ("prs", "Dari"),
    ("haw", "Hawaiian"),
    ("sot", "Sotho"),
    ("mhr", "Meadow Mari"),
    ("pap", "Papiamento"),
    ("udm", "Udmurt"),
    ("cos", "Corsican"),
    ("mrj", "Hill Mari"),
    ("uig", "Uyghur"),
    ("wuu", "Wu"),
    ("pcm", "Nigerian Pidgin"),
    ("tuk", "Turkmen"),
    ("srd", "Sardinian"),
    ("hak", "Hakka"),
    ("hsn", "Xiang"),
    ("orm", "Oromo"),
    ("tsn", "Tswana"),
    ("bew", "Betawi"),
    ("gan", "Gan"),
    ("kin", "Rwanda"),
    ("shi", "Shilha"),
    ("ace", "Acehnese"),
    ("quc", "K'iche'"),
    ("ssw", "Swazi"),
    ("ast", "Asturian"),
    ("iku", "Inuktitut"),
    ("bre", "Breton"),
    ("oji", "Ojibwe"),
    ("hsb", "Upper Sorbian"),
    ("chr", "Cherokee"),
    ("lkt", "Lakota"),
    ("ikt", "Inuinnaqtun"),
    ("qwe", "Quechua"),
    ("tir", "Tigrinya"),
    ("wol", "Wolof"),
    ("ewe", "Ewe"),
    ("fuc", "Pulaar"),
    ("bem", "Bemba"),
    ("mey", "Hassaniya"),
    ("kok", "Konkani"),
    ("nde", "Ndebele"),
    ("ven", "Tshivenda"),
    ("bod", "Tibetan"),
    ("oss", "Ossetian"),
    ("ble", "Balanta"),
    ("sag", "Sango"),
    ("div", "Dhivehi"),
    ("ogb", "Ogbia"),
    ("dzo", "Dzongkha"),
    ("tpi", "Tok Pisin"),
    ("oci", "Occitan"),
    ("crs", "Seychellois Creole"),
    ("fao", "Faroese"),
    ("amu", "Amuzgo"),
    ("agr", "Aguaruna"),
    ("jiv", "Shuar"),
    ("axk", "Aka"),
    ("sme", "Northern Sami"),
    ("ppk", "Uma"),
    ("arg", "Aragonese"),
    ("bis", "Bislama"),
    ("dsb", "Lower Sorbian"),
    ("acu", "Achuar"),
    ("soq", "Sona"),
    ("usp", "Uspantek"),
    ("bbg", "Barama"),
    ("kmr", "Kurmanji"),
    ("ckb", "Sorani"),
    ("nep", "Nepali"),
    ("yue", "Cantonese"),
    ("apc", "Levantine Arabic"),
    ("arz", "Egyptian Arabic"),
    ("afb", "Gulf Arabic"),
    ("mww", "Hmong Daw"),
    ("otq", "Querétaro Otomi"),
    ("tlh", "Klingon"),
    ("yua", "Yucatec Maya"),
    ("pus", "Pashto"),
    ("lzh", "Classical Chinese"),
    ("chv", "Chuvash"),
    ("lin", "Lingala"),
    ("lug", "Luganda"),
    ("sgg", "Swiss-German Sign Language"),
    ("liv", "Livonian"),
    ("sah", "Yakut"),
];

/// Two-letter codes used when labelling language pairs in reports.
const SHORT_CODES: &[(&str, &str)] = &[
    ("eng", "en"),
    ("deu", "de"),
    ("ces", "cs"),
    ("fra", "fr"),
    ("isl", "is"),
    ("zho", "zh"),
    ("hau", "ha"),
    ("jpn", "ja"),
    ("rus", "ru"),
    ("aeb", "ae"),
    ("spa", "es"),
    ("sgg", "dsgs"),
    ("hrv", "hr"),
    ("ukr", "uk"),
    ("sah", "sah"),
    ("liv", "liv"),
    ("por", "pt"),
    ("heb", "he"),
];

/// Case-insensitive membership test.
pub fn is_valid(code: &str) -> bool {
    LANGUAGES
        .iter()
        .any(|(c, _)| c.eq_ignore_ascii_case(code))
}

pub fn name(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|&(_, n)| n)
}

/// Short code for reports; unknown codes are returned unchanged.
pub fn short_code(code: &str) -> &str {
    SHORT_CODES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map_or(code, |&(_, s)| s)
}

/// Label of a language pair, e.g. `en-de`.
pub fn pair_label(source: &str, target: &str) -> String {
    format!("{}-{}", short_code(source), short_code(target))
}

/// Languages written without spaces between words.
pub fn is_character_based(code: &str) -> bool {
    let code = code.to_ascii_lowercase();
    code == "zho" || code == "jpn" || code.starts_with("zho-")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn whitelist() {
        assert!(is_valid("eng"));
        assert!(is_valid("DEU"));
        assert!(is_valid("zho-hans"));
        assert!(!is_valid("xxx"));
        assert!(!is_valid("en"));
        assert_eq!(name("fin"), Some("Finnish"));
    }

    #[test]
    fn short_codes() {
        assert_eq!(pair_label("eng", "deu"), "en-de");
        assert_eq!(pair_label("eng", "lit"), "en-lit");
        assert_eq!(short_code("sgg"), "dsgs");
    }

    #[test]
    fn character_based() {
        assert!(is_character_based("zho"));
        assert!(is_character_based("JPN"));
        assert!(is_character_based("zho-Hant"));
        assert!(!is_character_based("kor"));
    }
}
