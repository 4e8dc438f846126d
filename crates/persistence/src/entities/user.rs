//! User entity (database row mapping).

use domain::models::user::{Gender, PublicUserProfile};
use sqlx::FromRow;
use uuid::Uuid;

/// Database enum mapping for the `gender` PostgreSQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "gender", rename_all = "lowercase")]
pub enum GenderDb {
    Male,
    Female,
}

impl From<GenderDb> for Gender {
    fn from(db: GenderDb) -> Self {
        match db {
            GenderDb::Male => Gender::Male,
            GenderDb::Female => Gender::Female,
        }
    }
}

impl From<Gender> for GenderDb {
    fn from(gender: Gender) -> Self {
        match gender {
            Gender::Male => GenderDb::Male,
            Gender::Female => GenderDb::Female,
        }
    }
}

/// Database row mapping for the users table (public fields only).
#[derive(Debug, Clone, FromRow)]
pub struct UserEntity {
    pub id: Uuid,
    pub display_name: String,
    pub contact_number: Option<String>,
    pub avatar_url: Option<String>,
    pub gender: GenderDb,
}

impl From<UserEntity> for PublicUserProfile {
    fn from(entity: UserEntity) -> Self {
        Self {
            id: entity.id,
            display_name: entity.display_name,
            contact_number: entity.contact_number,
            avatar_url: entity.avatar_url,
            gender: entity.gender.into(),
        }
    }
}
