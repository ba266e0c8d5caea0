use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a user account.
    UserId
);
entity_id!(
    /// Unique identifier for a catalog product.
    ProductId
);
entity_id!(
    /// Unique identifier for a catalog category.
    CategoryId
);
entity_id!(
    /// Unique identifier for a product/category link.
    ProductCategoryId
);
entity_id!(
    /// Unique identifier for a shopping cart.
    CartId
);
entity_id!(
    /// Unique identifier for a line in a shopping cart.
    CartItemId
);
entity_id!(
    /// Unique identifier for an order.
    OrderId
);
entity_id!(
    /// Unique identifier for a line in an order.
    OrderItemId
);
entity_id!(
    /// Unique identifier for a password reset code record.
    ResetCodeId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_new_creates_unique_values() {
        let id1 = OrderId::new();
        let id2 = OrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn ids_from_uuid_preserve_value() {
        let uuid = Uuid::new_v4();
        let id = ProductId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn ids_parse_from_str() {
        let uuid = Uuid::new_v4();
        let id: CartId = uuid.to_string().parse().unwrap();
        assert_eq!(id.as_uuid(), uuid);
        assert!("not-a-uuid".parse::<CartId>().is_err());
    }

    #[test]
    fn ids_serialize_as_plain_uuid_strings() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }
}
