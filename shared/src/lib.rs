use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Returned when a text value does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a closed set of values stored as `TEXT` and sent over the wire
/// as the dashboard's lowercase names. Parsing also accepts English aliases.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $variant:ident => $wire:literal $(| $alias:literal)* ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize, AsExpression, FromSqlRow,
        )]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $(
                #[serde(rename = $wire $(, alias = $alias)*)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($wire $(| $alias)* => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                Ok(raw.parse::<$name>()?)
            }
        }
    };
}

text_enum! {
    /// Kind of goods the shelter accepts.
    Category {
        DogFood => "alimento_perros",
        CatFood => "alimento_gatos",
        Toys => "juguetes",
        Medicine => "medicamentos",
        Accessories => "accesorios",
        Blankets => "mantas",
        Other => "otros",
    }
}

text_enum! {
    /// Unit a quantity is measured in.
    Unit {
        Kilograms => "kg",
        Units => "unidades",
        Liters => "litros",
        Packages => "paquetes",
    }
}

text_enum! {
    /// Donation lifecycle: `pendiente -> {aceptada, rechazada}`,
    /// `{pendiente, aceptada} -> recibida`.
    DonationStatus {
        Pending => "pendiente" | "pending",
        Accepted => "aceptada" | "accepted",
        Rejected => "rechazada" | "rejected",
        Received => "recibida" | "received",
    }
}

text_enum! {
    /// Request lifecycle: `pendiente -> {aceptada, rechazada}`,
    /// `aceptada -> {rechazada, enviada, recibida}`.
    RequestStatus {
        Pending => "pendiente" | "pending",
        Accepted => "aceptada" | "accepted",
        Rejected => "rechazada" | "rejected",
        Shipped => "enviada" | "shipped",
        Received => "recibida" | "received",
    }
}

text_enum! {
    Role {
        User => "usuario" | "user",
        Administrator => "administrador" | "admin" | "administrator",
    }
}

text_enum! {
    /// Direction of a manual stock adjustment.
    AdjustOperation {
        Add => "add",
        Subtract => "subtract",
    }
}

impl RequestStatus {
    /// States that count toward the one-active-request-per-user limit.
    pub const ACTIVE: [RequestStatus; 3] = [
        RequestStatus::Pending,
        RequestStatus::Accepted,
        RequestStatus::Shipped,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

/// Identity resolved upstream; trusted as-is by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self::new(user_id, Role::User)
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Administrator)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }

    pub fn owns(&self, owner: Uuid) -> bool {
        self.user_id == owner
    }

    /// Administrators see everything; users only what they own.
    pub fn can_view(&self, owner: Uuid) -> bool {
        self.is_admin() || self.owns(owner)
    }

    /// Owner filter for list queries: `None` means every record.
    pub fn visible_owner(&self) -> Option<Uuid> {
        if self.is_admin() {
            None
        } else {
            Some(self.user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_names_and_aliases() {
        assert_eq!("recibida".parse::<DonationStatus>(), Ok(DonationStatus::Received));
        assert_eq!("received".parse::<DonationStatus>(), Ok(DonationStatus::Received));
        assert_eq!("enviada".parse::<RequestStatus>(), Ok(RequestStatus::Shipped));
        assert_eq!("admin".parse::<Role>(), Ok(Role::Administrator));
        assert_eq!(" kg ".parse::<Unit>(), Ok(Unit::Kilograms));
    }

    #[test]
    fn rejects_unknown_values() {
        let err = "multiply".parse::<AdjustOperation>().unwrap_err();
        assert_eq!(err.kind, "AdjustOperation");
        assert_eq!(err.value, "multiply");
    }

    #[test]
    fn serializes_dashboard_names() {
        let json = serde_json::to_string(&Category::DogFood).unwrap();
        assert_eq!(json, "\"alimento_perros\"");
        let status: RequestStatus = serde_json::from_str("\"shipped\"").unwrap();
        assert_eq!(status, RequestStatus::Shipped);
    }

    #[test]
    fn active_states() {
        assert!(RequestStatus::Pending.is_active());
        assert!(RequestStatus::Shipped.is_active());
        assert!(!RequestStatus::Received.is_active());
        assert!(!RequestStatus::Rejected.is_active());
    }

    #[test]
    fn principal_visibility() {
        let owner = Uuid::new_v4();
        let user = Principal::user(owner);
        let other = Principal::user(Uuid::new_v4());
        let admin = Principal::admin(Uuid::new_v4());
        assert!(user.can_view(owner));
        assert!(!other.can_view(owner));
        assert!(admin.can_view(owner));
        assert_eq!(user.visible_owner(), Some(owner));
        assert_eq!(admin.visible_owner(), None);
    }
}
