use crate::{
    crypto::FieldCipher,
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::users::{BalanceUpdate, UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
    money,
    types::{TransactionType, UserId},
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;

/// Filter for listing users
#[derive(Debug, Clone)]
pub struct UserFilter {
    pub skip: i64,
    pub limit: i64,
}

impl UserFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit }
    }
}

// Row as stored; full_name is ciphertext
#[derive(Debug, Clone, FromRow)]
struct User {
    pub id: UserId,
    pub full_name: String,
    pub email: Option<String>,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

const USER_COLUMNS: &str = "id, full_name, email, balance, created_at, updated_at";

pub struct Users<'c> {
    db: &'c mut PgConnection,
    cipher: &'c FieldCipher,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection, cipher: &'c FieldCipher) -> Self {
        Self { db, cipher }
    }

    fn encrypt_name(&self, full_name: &str) -> Result<String> {
        self.cipher
            .encrypt(full_name)
            .map_err(|e| DbError::Other(anyhow::anyhow!("encrypt full_name: {e}")))
    }

    fn decrypt(&self, user: User) -> Result<UserDBResponse> {
        let full_name = self
            .cipher
            .decrypt(&user.full_name)
            .map_err(|e| DbError::Other(anyhow::anyhow!("decrypt full_name of user {}: {e}", user.id)))?;

        Ok(UserDBResponse {
            id: user.id,
            full_name,
            email: user.email,
            balance: user.balance,
            created_at: user.created_at,
            updated_at: user.updated_at,
        })
    }

    /// Total number of users, for pagination
    #[instrument(skip(self), err)]
    pub async fn count(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    /// Current balance in cents, `None` if the user does not exist
    #[instrument(skip(self), err)]
    pub async fn get_balance(&mut self, id: UserId) -> Result<Option<i64>> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(balance)
    }

    /// Lock the user row for the rest of the surrounding transaction and return its balance
    #[instrument(skip(self), err)]
    pub async fn lock_balance(&mut self, id: UserId) -> Result<Option<i64>> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(balance)
    }

    /// Apply a credit or debit of `amount` cents. Call inside a transaction.
    ///
    /// A debit larger than the balance leaves the row untouched and reports
    /// [`BalanceUpdate::InsufficientFunds`].
    #[instrument(skip(self), err)]
    pub async fn adjust_balance(&mut self, id: UserId, transaction_type: TransactionType, amount: i64) -> Result<BalanceUpdate> {
        let balance = self.lock_balance(id).await?.ok_or(DbError::NotFound)?;

        let new_balance = match money::apply_to_balance(balance, transaction_type, amount) {
            Ok(new_balance) => new_balance,
            Err(money::MoneyError::InsufficientFunds { balance, .. }) => return Ok(BalanceUpdate::InsufficientFunds { balance }),
            Err(e) => return Err(DbError::Other(anyhow::anyhow!("adjust balance of user {id}: {e}"))),
        };

        sqlx::query("UPDATE users SET balance = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(new_balance)
            .execute(&mut *self.db)
            .await?;

        Ok(BalanceUpdate::Applied { balance: new_balance })
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(email = ?request.email), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let encrypted_name = self.encrypt_name(&request.full_name)?;

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (full_name, email, balance) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        ))
        .bind(encrypted_name)
        .bind(&request.email)
        .bind(request.balance)
        .fetch_one(&mut *self.db)
        .await?;

        self.decrypt(user)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        user.map(|u| self.decrypt(u)).transpose()
    }

    #[instrument(skip(self, filter), fields(skip = filter.skip, limit = filter.limit), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        users.into_iter().map(|u| self.decrypt(u)).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let encrypted_name = request.full_name.as_deref().map(|name| self.encrypt_name(name)).transpose()?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET
                full_name = COALESCE($2, full_name),
                email = COALESCE($3, email),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(encrypted_name)
        .bind(&request.email)
        .fetch_one(&mut *self.db)
        .await?;

        self.decrypt(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_cipher;
    use sqlx::{Connection, PgPool};

    fn create_request(name: &str, email: &str, balance: i64) -> UserCreateDBRequest {
        UserCreateDBRequest {
            full_name: name.to_string(),
            email: Some(email.to_string()),
            balance,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_user_encrypts_full_name(pool: PgPool) {
        let cipher = test_cipher();
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn, &cipher);

        let user = repo.create(&create_request("Grace Hopper", "grace@example.com", 10_000)).await.unwrap();
        assert_eq!(user.full_name, "Grace Hopper");
        assert_eq!(user.email.as_deref(), Some("grace@example.com"));
        assert_eq!(user.balance, 10_000);

        let stored: String = sqlx::query_scalar("SELECT full_name FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_ne!(stored, "Grace Hopper");
        assert_eq!(cipher.decrypt(&stored).unwrap(), "Grace Hopper");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_email_is_unique_violation(pool: PgPool) {
        let cipher = test_cipher();
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn, &cipher);

        repo.create(&create_request("A", "dup@example.com", 0)).await.unwrap();
        let err = repo.create(&create_request("B", "dup@example.com", 0)).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_negative_balance_is_check_violation(pool: PgPool) {
        let cipher = test_cipher();
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn, &cipher);

        let err = repo.create(&create_request("A", "neg@example.com", -1)).await.unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_list_and_delete(pool: PgPool) {
        let cipher = test_cipher();
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn, &cipher);

        let user = repo.create(&create_request("Old Name", "old@example.com", 500)).await.unwrap();
        repo.create(&create_request("Other", "other@example.com", 0)).await.unwrap();

        let updated = repo
            .update(
                user.id,
                &UserUpdateDBRequest {
                    full_name: Some("New Name".to_string()),
                    email: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.full_name, "New Name");
        assert_eq!(updated.email.as_deref(), Some("old@example.com"));
        assert_eq!(updated.balance, 500);
        assert!(updated.updated_at.is_some());

        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(repo.list(&UserFilter::new(0, 10)).await.unwrap().len(), 2);
        assert_eq!(repo.list(&UserFilter::new(1, 10)).await.unwrap().len(), 1);

        assert!(repo.delete(user.id).await.unwrap());
        assert!(!repo.delete(user.id).await.unwrap());
        assert!(repo.get_by_id(user.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_missing_user_is_not_found(pool: PgPool) {
        let cipher = test_cipher();
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn, &cipher);

        let err = repo.update(9999, &UserUpdateDBRequest::default()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_adjust_balance(pool: PgPool) {
        let cipher = test_cipher();
        let mut conn = pool.acquire().await.unwrap();
        let mut tx = conn.begin().await.unwrap();
        let mut repo = Users::new(&mut tx, &cipher);

        let user = repo.create(&create_request("Payer", "payer@example.com", 1_000)).await.unwrap();

        assert_eq!(
            repo.adjust_balance(user.id, TransactionType::Credit, 250).await.unwrap(),
            BalanceUpdate::Applied { balance: 1_250 }
        );
        assert_eq!(
            repo.adjust_balance(user.id, TransactionType::Debit, 1_250).await.unwrap(),
            BalanceUpdate::Applied { balance: 0 }
        );
        assert_eq!(
            repo.adjust_balance(user.id, TransactionType::Debit, 1).await.unwrap(),
            BalanceUpdate::InsufficientFunds { balance: 0 }
        );
        assert_eq!(repo.get_balance(user.id).await.unwrap(), Some(0));

        assert!(matches!(
            repo.adjust_balance(424242, TransactionType::Credit, 1).await,
            Err(DbError::NotFound)
        ));

        tx.commit().await.unwrap();
    }
}
