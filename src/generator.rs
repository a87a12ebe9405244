use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use thiserror::Error;

pub const DEFAULT_LENGTH: usize = 20;

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const PUNCT: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("No character group selected")]
    NoGroups,
}

/// Character groups a generated password may draw from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharGroups {
    pub lower: bool,
    pub upper: bool,
    pub digits: bool,
    pub punct: bool,
    pub extra: String,
}

impl Default for CharGroups {
    fn default() -> Self {
        Self {
            lower: true,
            upper: true,
            digits: true,
            punct: true,
            extra: String::new(),
        }
    }
}

impl CharGroups {
    pub fn none() -> Self {
        Self {
            lower: false,
            upper: false,
            digits: false,
            punct: false,
            extra: String::new(),
        }
    }

    fn selected(&self) -> Vec<Vec<char>> {
        [
            (self.lower, LOWER),
            (self.upper, UPPER),
            (self.digits, DIGITS),
            (self.punct, PUNCT),
            (!self.extra.is_empty(), self.extra.as_str()),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .map(|(_, chars)| chars.chars().collect())
        .collect()
    }
}

/// Picks a random group, then a random character from it, `length` times.
/// Selecting a group does not guarantee it appears in the result.
pub fn generate(length: usize, groups: &CharGroups) -> Result<String, GeneratorError> {
    let groups = groups.selected();
    if groups.is_empty() {
        return Err(GeneratorError::NoGroups);
    }
    let mut rng = OsRng;
    let mut out = String::with_capacity(length);
    for _ in 0..length {
        let group = groups.choose(&mut rng).ok_or(GeneratorError::NoGroups)?;
        let c = group.choose(&mut rng).ok_or(GeneratorError::NoGroups)?;
        out.push(*c);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_requested_length() {
        let pwd = generate(32, &CharGroups::default()).unwrap();
        assert_eq!(pwd.chars().count(), 32);
    }

    #[test]
    fn digits_only() {
        let groups = CharGroups {
            digits: true,
            ..CharGroups::none()
        };
        let pwd = generate(50, &groups).unwrap();
        assert!(pwd.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn extra_characters_only() {
        let groups = CharGroups {
            extra: "äö".to_string(),
            ..CharGroups::none()
        };
        let pwd = generate(20, &groups).unwrap();
        assert!(pwd.chars().all(|c| c == 'ä' || c == 'ö'));
    }

    #[test]
    fn no_groups_is_an_error() {
        assert_eq!(generate(10, &CharGroups::none()), Err(GeneratorError::NoGroups));
    }

    #[test]
    fn zero_length_is_empty() {
        assert_eq!(generate(0, &CharGroups::default()).unwrap(), "");
    }
}
