//! Synthesis of "bad reference" quality-control items.
//!
//! A bad reference is a candidate translation in which a phrase has been
//! replaced by a phrase of the same length taken from an unrelated reference
//! segment. Annotators who pay attention should score it clearly lower than
//! the untouched candidate.

use crate::errors::{self, Result};
use rand::Rng;
use rand::seq::SliceRandom;

/// Length of the replacement phrase for a segment of `tokens` tokens.
///
/// Character-based languages use characters as tokens and twice the length.
pub fn phrase_length(tokens: usize, character_based: bool) -> usize {
    let len = match tokens {
        0 | 1 => 1,
        2..=5 => 2,
        6..=8 => 3,
        9..=15 => 4,
        16..=20 => 5,
        _ => tokens / 4,
    };
    if character_based { 2 * len } else { len }
}

/// Splits text into words, or into characters for character-based languages.
pub fn tokenize(text: &str, character_based: bool) -> Vec<&str> {
    if character_based {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(' ').collect()
    }
}

fn join(tokens: &[&str], character_based: bool) -> String {
    if character_based {
        tokens.concat()
    } else {
        tokens.join(" ")
    }
}

/// Start positions at which a phrase of `phrase` tokens may replace part of
/// a segment of `tokens` tokens. The phrase stays off both ends whenever the
/// segment has at least two tokens more than the phrase.
pub fn splice_positions(tokens: usize, phrase: usize) -> Vec<usize> {
    if tokens <= phrase {
        return vec![0];
    }
    let last = tokens - phrase;
    if tokens > 3 && last >= 2 {
        (1..last).collect()
    } else {
        (0..=last).collect()
    }
}

/// Replaces a phrase of `candidate` by a phrase of the same length from `donor`.
pub fn splice<R: Rng>(candidate: &str, donor: &str, character_based: bool, rng: &mut R) -> String {
    let tokens = tokenize(candidate, character_based);
    let donor = tokenize(donor, character_based);
    let mut len = phrase_length(tokens.len(), character_based).min(donor.len());
    // Segments longer than three tokens keep their first and last token.
    if tokens.len() > 3 {
        len = len.min(tokens.len() - 2);
    }
    let from = if donor.len() > len {
        rng.gen_range(0..=donor.len() - len)
    } else {
        0
    };
    let phrase = &donor[from..from + len];
    let positions = splice_positions(tokens.len(), len);
    let at = *positions.choose(rng).unwrap_or(&0);
    let end = (at + len).min(tokens.len());
    let mut bad = Vec::with_capacity(tokens.len() + len);
    bad.extend_from_slice(&tokens[..at]);
    bad.extend_from_slice(phrase);
    bad.extend_from_slice(&tokens[end..]);
    join(&bad, character_based)
}

/// Picks donor phrases from a pool of reference segments.
pub struct BadRefGenerator<'a> {
    references: &'a [String],
    character_based: bool,
}

impl<'a> BadRefGenerator<'a> {
    pub fn new(references: &'a [String], character_based: bool) -> BadRefGenerator<'a> {
        BadRefGenerator {
            references,
            character_based,
        }
    }

    /// Creates the bad reference for the candidate of segment `own` (0-based).
    ///
    /// The donor is a different segment, longer than the phrase whenever the
    /// pool has such a segment.
    pub fn generate<R: Rng>(&self, candidate: &str, own: usize, rng: &mut R) -> Result<String> {
        let tokens = tokenize(candidate, self.character_based).len();
        let len = phrase_length(tokens, self.character_based);
        let others: Vec<usize> = (0..self.references.len())
            .filter(|&i| i != own && !self.references[i].is_empty())
            .collect();
        let long: Vec<usize> = others
            .iter()
            .copied()
            .filter(|&i| tokenize(&self.references[i], self.character_based).len() > len)
            .collect();
        let pool = if long.is_empty() { &others } else { &long };
        let donor = pool.choose(rng).ok_or_else(|| {
            errors::invalid_input_ref("need at least two non-empty reference segments")
        })?;
        Ok(splice(
            candidate,
            &self.references[*donor],
            self.character_based,
            rng,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::shuffle;

    #[test]
    fn phrase_lengths() {
        let expected = [
            (1, 1),
            (2, 2),
            (5, 2),
            (6, 3),
            (8, 3),
            (9, 4),
            (15, 4),
            (16, 5),
            (20, 5),
            (21, 5),
            (40, 10),
        ];
        for (tokens, len) in expected {
            assert_eq!(phrase_length(tokens, false), len, "{tokens} tokens");
        }
        assert_eq!(phrase_length(6, true), 6);
    }

    #[test]
    fn positions_are_embedded() {
        assert_eq!(splice_positions(6, 3), vec![1, 2]);
        assert_eq!(splice_positions(4, 2), vec![1]);
        assert_eq!(splice_positions(3, 2), vec![0, 1]);
        assert_eq!(splice_positions(1, 1), vec![0]);
        assert_eq!(splice_positions(2, 4), vec![0]);
    }

    #[test]
    fn cat_on_the_mat() {
        let candidate = "the cat sat on the mat";
        let donor = "jumped over the lazy dog";
        let orig: Vec<&str> = candidate.split(' ').collect();
        let don: Vec<&str> = donor.split(' ').collect();
        for seed in 0..50 {
            let mut rng = shuffle::seeded(seed);
            let bad = splice(candidate, donor, false, &mut rng);
            let bad: Vec<&str> = bad.split(' ').collect();
            assert_eq!(bad.len(), 6);
            assert!((1..=3).any(|at| {
                bad[..at] == orig[..at]
                    && bad[at + 3..] == orig[at + 3..]
                    && don.windows(3).any(|w| w == &bad[at..at + 3])
            }));
        }
    }

    #[test]
    fn characters() {
        let donor: Vec<char> = "天气很好今天晴朗".chars().collect();
        for seed in 0..20 {
            let mut rng = shuffle::seeded(seed);
            let bad: Vec<char> = splice("我爱你中国人民", "天气很好今天晴朗", true, &mut rng)
                .chars()
                .collect();
            assert_eq!(bad.len(), 7);
            assert_eq!(bad[0], '我');
            assert_eq!(bad[6], '民');
            assert!(donor.windows(5).any(|w| w == &bad[1..6]));
        }
    }

    #[test]
    fn short_segments_keep_both_ends() {
        for seed in 0..20 {
            let mut rng = shuffle::seeded(seed);
            let bad = splice("abcde", "vwxyz", true, &mut rng);
            assert_eq!(bad.len(), 5);
            assert!(bad.starts_with('a') && bad.ends_with('e'), "{bad}");
            let bad = splice("one two three four", "five six seven eight", false, &mut rng);
            let words: Vec<&str> = bad.split(' ').collect();
            assert_eq!(words.len(), 4);
            assert_eq!((words[0], words[3]), ("one", "four"));
        }
    }

    #[test]
    fn generator_avoids_own_segment() {
        let refs = vec![
            "alpha beta gamma delta".to_owned(),
            "one two three four five six".to_owned(),
        ];
        let generator = BadRefGenerator::new(&refs, false);
        let mut rng = shuffle::seeded(7);
        for _ in 0..20 {
            let bad = generator.generate("a b c d e", 0, &mut rng).unwrap();
            let words: Vec<&str> = bad.split(' ').collect();
            assert_eq!(words.len(), 5);
            assert!(words.iter().any(|w| refs[1].split(' ').any(|x| x == *w)));
        }
        let lonely = vec!["just one".to_owned()];
        let generator = BadRefGenerator::new(&lonely, false);
        assert!(generator.generate("x y", 0, &mut rng).is_err());
    }
}
