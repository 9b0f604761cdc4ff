//! Avatar URL resolution
//!
//! Picks the picture shown next to a user's messages. Resolution happens
//! once, when the session is turned into an identity at admission time.

use crate::error::AvatarError;
use crate::session::Identity;

const GRAVATAR_BASE: &str = "//www.gravatar.com/avatar/";

/// Maps an identity to an avatar URL
pub trait AvatarResolver: Send + Sync {
    fn avatar_url(&self, identity: &Identity) -> Result<String, AvatarError>;
}

/// Uses the picture supplied by the identity provider
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthAvatar;

impl AvatarResolver for AuthAvatar {
    fn avatar_url(&self, identity: &Identity) -> Result<String, AvatarError> {
        if identity.avatar_url.is_empty() {
            return Err(AvatarError::NoAvatarUrl);
        }
        Ok(identity.avatar_url.clone())
    }
}

/// Derives a Gravatar URL from the identity hash
#[derive(Debug, Default, Clone, Copy)]
pub struct GravatarAvatar;

impl AvatarResolver for GravatarAvatar {
    fn avatar_url(&self, identity: &Identity) -> Result<String, AvatarError> {
        Ok(format!("{}{}", GRAVATAR_BASE, identity.user_id))
    }
}

/// Tries each resolver in turn and returns the first URL found
pub struct TryAvatars(pub Vec<Box<dyn AvatarResolver>>);

impl AvatarResolver for TryAvatars {
    fn avatar_url(&self, identity: &Identity) -> Result<String, AvatarError> {
        for resolver in &self.0 {
            if let Ok(url) = resolver.avatar_url(identity) {
                return Ok(url);
            }
        }
        Err(AvatarError::NoAvatarUrl)
    }
}

/// Which resolver the server uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvatarStyle {
    #[default]
    Auth,
    Gravatar,
}

impl AvatarStyle {
    pub fn resolver(self) -> Box<dyn AvatarResolver> {
        match self {
            AvatarStyle::Auth => {
                let chain: Vec<Box<dyn AvatarResolver>> =
                    vec![Box::new(AuthAvatar), Box::new(GravatarAvatar)];
                Box::new(TryAvatars(chain))
            }
            AvatarStyle::Gravatar => Box::new(GravatarAvatar),
        }
    }
}

impl std::str::FromStr for AvatarStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auth" => Ok(AvatarStyle::Auth),
            "gravatar" => Ok(AvatarStyle::Gravatar),
            other => Err(other.to_string()),
        }
    }
}
