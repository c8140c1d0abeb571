use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw storage key.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw storage key.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_type!(
    /// Identifier of a buyer. Issued by the user service, opaque here.
    UserId
);

id_type!(
    /// Identifier of a catalog product.
    ProductId
);

id_type!(
    /// Identifier of an order in the order ledger.
    OrderId
);

id_type!(
    /// Identifier of a payment in the payment ledger.
    PaymentId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_preserve_raw_value() {
        assert_eq!(OrderId::new(42).as_i64(), 42);
        assert_eq!(i64::from(PaymentId::from(7)), 7);
    }

    #[test]
    fn ids_serialize_as_plain_integers() {
        let json = serde_json::to_string(&ProductId::new(3)).unwrap();
        assert_eq!(json, "3");
        let back: ProductId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProductId::new(3));
    }

    #[test]
    fn ids_display_raw_value() {
        assert_eq!(UserId::new(1).to_string(), "1");
    }
}
