//! Bindable dependency identities.
//!
//! A [`Token`] names something the provider container can bind and
//! resolve. Typed tokens carry the `TypeId` of a Rust type; symbolic
//! tokens are named handles for values and factories that have no
//! dedicated type. Tokens are value-equal: registering the same token
//! twice at the same scope replaces the earlier binding.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// Opaque identity of a bindable dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    kind: TokenKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TokenKind {
    Typed {
        type_id: TypeId,
        type_name: &'static str,
    },
    Named(Arc<str>),
}

impl Token {
    /// Token for a concrete Rust type.
    pub fn of<T: 'static>() -> Self {
        Self {
            kind: TokenKind::Typed {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            },
        }
    }

    /// Symbolic token with a stable name.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self {
            kind: TokenKind::Named(name.into()),
        }
    }

    /// Human-readable name, for diagnostics.
    pub fn name(&self) -> &str {
        match &self.kind {
            TokenKind::Typed { type_name, .. } => type_name,
            TokenKind::Named(name) => name,
        }
    }

    /// Whether this token identifies a Rust type.
    pub fn is_typed(&self) -> bool {
        matches!(self.kind, TokenKind::Typed { .. })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<&str> for Token {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Database;
    struct Mailer;

    #[test]
    fn typed_tokens_are_value_equal() {
        assert_eq!(Token::of::<Database>(), Token::of::<Database>());
        assert_ne!(Token::of::<Database>(), Token::of::<Mailer>());
    }

    #[test]
    fn named_tokens_compare_by_name() {
        assert_eq!(Token::named("api-key"), Token::named("api-key"));
        assert_ne!(Token::named("api-key"), Token::named("api-url"));
    }

    #[test]
    fn typed_and_named_never_collide() {
        let typed = Token::of::<Database>();
        let named = Token::named(typed.name().to_string());
        assert_ne!(typed, named);
    }
}
