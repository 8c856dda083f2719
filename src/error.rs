use std::fmt;
use std::io;

/// Failures raised by the attack core. None of these are retried; the
/// attack either completes every iteration or returns one of these before
/// producing an image.
#[derive(Debug)]
pub enum AttackError {
    /// The requested norm is neither L2 nor L-infinity
    UnsupportedNorm { norm: String },
    /// Two tensors that must agree in shape do not
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        given: Vec<usize>,
    },
    /// A budget is negative or not finite
    InvalidBudget { value: f64 },
    /// The wrapped model failed during inference or its backward pass
    Model { message: String },
}

impl AttackError {
    pub fn shape_mismatch(what: &'static str, expected: &[usize], given: &[usize]) -> Self {
        Self::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            given: given.to_vec(),
        }
    }
}

impl fmt::Display for AttackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnsupportedNorm { norm } => {
                write!(f, "unsupported norm type {:?}, expected L2 or Linf", norm)
            }
            Self::ShapeMismatch {
                what,
                expected,
                given,
            } => write!(
                f,
                "shape mismatch for {}: expected {:?}, given {:?}",
                what, expected, given
            ),
            Self::InvalidBudget { value } => write!(f, "invalid norm budget {}", value),
            Self::Model { message } => write!(f, "model error: {}", message),
        }
    }
}

impl std::error::Error for AttackError {}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
    Invalid { field: &'static str, reason: String },
    Attack(AttackError),
    Logging(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "could not read config: {}", err),
            Self::Parse(err) => write!(f, "could not parse config: {}", err),
            Self::Invalid { field, reason } => write!(f, "invalid `{}`: {}", field, reason),
            Self::Attack(err) => write!(f, "{}", err),
            Self::Logging(msg) => write!(f, "could not initialize logging: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Attack(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err)
    }
}

impl From<AttackError> for ConfigError {
    fn from(err: AttackError) -> Self {
        Self::Attack(err)
    }
}
