use serde::{Deserialize, Serialize};

/// Chat room color theme. The set is fixed; anything else is rejected at the
/// API boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Default,
    Blue,
    Green,
    Purple,
    Orange,
    Red,
    Pink,
    Grey,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Default => "default",
            Theme::Blue => "blue",
            Theme::Green => "green",
            Theme::Purple => "purple",
            Theme::Orange => "orange",
            Theme::Red => "red",
            Theme::Pink => "pink",
            Theme::Grey => "grey",
        }
    }
}

impl std::str::FromStr for Theme {
    type Err = InvalidTheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Theme::Default),
            "blue" => Ok(Theme::Blue),
            "green" => Ok(Theme::Green),
            "purple" => Ok(Theme::Purple),
            "orange" => Ok(Theme::Orange),
            "red" => Ok(Theme::Red),
            "pink" => Ok(Theme::Pink),
            "grey" => Ok(Theme::Grey),
            other => Err(InvalidTheme(other.to_string())),
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid theme: {0}")]
pub struct InvalidTheme(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        for name in [
            "default", "blue", "green", "purple", "orange", "red", "pink", "grey",
        ] {
            let theme: Theme = name.parse().unwrap();
            assert_eq!(theme.as_str(), name);
        }
    }

    #[test]
    fn rejects_unknown_theme() {
        assert!("mauve".parse::<Theme>().is_err());
    }
}
