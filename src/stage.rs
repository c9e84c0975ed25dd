//! Optional pipeline stages
//!
//! A disabled stage is `Identity` and is a pure passthrough; an enabled one
//! carries its parameters and state. Pipelines hold a fixed sequence of
//! stages instead of checking booleans at every call site.

#[derive(Debug, Clone)]
pub enum Stage<T> {
    Identity,
    Active(T),
}

impl<T> Stage<T> {
    pub fn from_option(inner: Option<T>) -> Self {
        match inner {
            Some(inner) => Stage::Active(inner),
            None => Stage::Identity,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Stage::Active(_))
    }

    pub fn active(&self) -> Option<&T> {
        match self {
            Stage::Active(inner) => Some(inner),
            Stage::Identity => None,
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut T> {
        match self {
            Stage::Active(inner) => Some(inner),
            Stage::Identity => None,
        }
    }
}

impl<T> Default for Stage<T> {
    fn default() -> Self {
        Stage::Identity
    }
}
