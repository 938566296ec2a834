use serde::{Deserialize, Serialize};

/// Reward count used for a sure stimulus whose identity does not parse.
pub const DEFAULT_SURE_VALUE: u32 = 1;

/// Which image bag a stimulus was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StimulusKind {
    Sure,
    Gamble,
}

impl StimulusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StimulusKind::Sure => "sure",
            StimulusKind::Gamble => "gamble",
        }
    }
}

/// Reward semantics encoded in a stimulus identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "lowercase")]
pub enum Payload {
    Sure {
        value: u32,
    },
    Gamble {
        win: u32,
        lose: u32,
        #[serde(rename = "winProbability")]
        win_probability: f64,
    },
    Unknown,
}

impl Payload {
    /// Parses the trailing filename component of `identity`.
    ///
    /// Sure identities look like `sure<N>` with `N > 0`, gamble identities like
    /// `gamble<Win>v<Lose>pw<Percent>` with `Percent <= 100`. Matching ignores
    /// case, any leading directory and the file extension. Anything else is
    /// [`Payload::Unknown`]; this never fails.
    pub fn parse(identity: &str) -> Self {
        let stem = file_stem(identity).to_ascii_lowercase();

        if let Some(rest) = stem.rfind("gamble").map(|at| &stem[at + "gamble".len()..]) {
            if let Some(payload) = parse_gamble(rest) {
                return payload;
            }
        }
        if let Some(rest) = stem.rfind("sure").map(|at| &stem[at + "sure".len()..]) {
            if let Some(value) = parse_number(rest).filter(|v| *v > 0) {
                return Payload::Sure { value };
            }
        }
        Payload::Unknown
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Payload::Unknown)
    }
}

fn file_stem(identity: &str) -> &str {
    let name = identity.rsplit(['/', '\\']).next().unwrap_or(identity);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

fn parse_number(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

// `<win>v<lose>pw<percent>`
fn parse_gamble(rest: &str) -> Option<Payload> {
    let (win, rest) = rest.split_once('v')?;
    let (lose, percent) = rest.split_once("pw")?;
    let percent = parse_number(percent).filter(|p| *p <= 100)?;
    Some(Payload::Gamble {
        win: parse_number(win)?,
        lose: parse_number(lose)?,
        win_probability: f64::from(percent) / 100.0,
    })
}

/// A loaded image stimulus. Identity is the content path; the payload is
/// parsed once at load time and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub path: String,
    pub kind: StimulusKind,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Stimulus {
    pub fn new(kind: StimulusKind, path: impl Into<String>) -> Self {
        let path = path.into();
        let payload = Payload::parse(&path);
        Self {
            path,
            kind,
            payload,
        }
    }

    pub fn sure(path: impl Into<String>) -> Self {
        Self::new(StimulusKind::Sure, path)
    }

    pub fn gamble(path: impl Into<String>) -> Self {
        Self::new(StimulusKind::Gamble, path)
    }

    pub fn is_sure(&self) -> bool {
        self.kind == StimulusKind::Sure
    }

    /// The guaranteed reward of a sure stimulus, with the documented default
    /// for identities that did not parse.
    pub fn sure_value(&self) -> Option<u32> {
        match (self.kind, self.payload) {
            (_, Payload::Sure { value }) => Some(value),
            (StimulusKind::Sure, Payload::Unknown) => Some(DEFAULT_SURE_VALUE),
            _ => None,
        }
    }
}

/// Screen slot a stimulus is shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Center,
    Right,
}

impl Position {
    pub const ALL: [Position; 3] = [Position::Left, Position::Center, Position::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Center => "center",
            Position::Right => "right",
        }
    }
}

/// Something the subject can click during a response window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Stimulus(Position),
    Background,
}

impl Target {
    pub fn position(&self) -> Option<Position> {
        match self {
            Target::Stimulus(position) => Some(*position),
            Target::Background => None,
        }
    }
}
