//! API request/response models for users.

use crate::{
    db::models::users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    errors::{Error, Result},
    money,
    types::UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const MAX_FULL_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserCreate {
    /// 1 to 100 characters
    #[schema(example = "Ada Lovelace")]
    pub full_name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    /// Opening balance, sent as a string to preserve precision
    #[schema(value_type = String, example = "100.00")]
    #[serde(default)]
    pub balance: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: UserId,
    pub full_name: String,
    pub email: Option<String>,
    #[schema(value_type = String, example = "100.00")]
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserBalanceResponse {
    pub user_id: UserId,
    #[schema(value_type = String, example = "100.00")]
    pub balance: Decimal,
}

fn validate_full_name(full_name: &str) -> Result<String> {
    let trimmed = full_name.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_FULL_NAME_LEN {
        return Err(Error::BadRequest {
            message: format!("full_name must be between 1 and {MAX_FULL_NAME_LEN} characters"),
        });
    }
    Ok(trimmed.to_string())
}

pub fn validate_email(email: &str) -> Result<String> {
    let trimmed = email.trim();
    trimmed.parse::<lettre::Address>().map_err(|_| Error::BadRequest {
        message: format!("'{trimmed}' is not a valid email address"),
    })?;
    Ok(trimmed.to_string())
}

impl UserCreate {
    pub fn into_db_request(self) -> Result<UserCreateDBRequest> {
        Ok(UserCreateDBRequest {
            full_name: validate_full_name(&self.full_name)?,
            email: Some(validate_email(&self.email)?),
            balance: money::balance_to_cents(self.balance)?,
        })
    }
}

impl UserUpdate {
    pub fn into_db_request(self) -> Result<UserUpdateDBRequest> {
        Ok(UserUpdateDBRequest {
            full_name: self.full_name.as_deref().map(validate_full_name).transpose()?,
            email: self.email.as_deref().map(validate_email).transpose()?,
        })
    }
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            full_name: db.full_name,
            email: db.email,
            balance: money::from_cents(db.balance),
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn create(full_name: &str, email: &str, balance: &str) -> UserCreate {
        UserCreate {
            full_name: full_name.to_string(),
            email: email.to_string(),
            balance: Decimal::from_str(balance).unwrap(),
        }
    }

    #[test]
    fn converts_balance_to_cents() {
        let request = create("  Ada  ", "ada@example.com", "100.505").into_db_request().unwrap();
        assert_eq!(request.full_name, "Ada");
        assert_eq!(request.balance, 10_051);
        assert_eq!(request.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(matches!(
            create("", "ada@example.com", "0").into_db_request(),
            Err(Error::BadRequest { .. })
        ));
        assert!(matches!(
            create(&"x".repeat(101), "ada@example.com", "0").into_db_request(),
            Err(Error::BadRequest { .. })
        ));
        assert!(matches!(
            create("Ada", "not-an-email", "0").into_db_request(),
            Err(Error::BadRequest { .. })
        ));
        assert!(matches!(
            create("Ada", "ada@example.com", "-1").into_db_request(),
            Err(Error::BadRequest { .. })
        ));
    }

    #[test]
    fn update_validates_only_present_fields() {
        let request = UserUpdate::default().into_db_request().unwrap();
        assert!(request.full_name.is_none() && request.email.is_none());

        assert!(
            UserUpdate {
                email: Some("bad".into()),
                ..Default::default()
            }
            .into_db_request()
            .is_err()
        );
    }

    #[test]
    fn response_renders_balance_as_string() {
        let response = UserResponse::from(UserDBResponse {
            id: 1,
            full_name: "Ada".into(),
            email: None,
            balance: 12_345,
            created_at: Utc::now(),
            updated_at: None,
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["balance"], "123.45");
    }
}
