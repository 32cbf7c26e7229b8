//! Account creation: client signup, admin-created barbers, and the invite
//! flow that lets a barber register themselves from a single-use token.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::hash_password;
use crate::error::ApiError;
use crate::models::{
    Barber, BarberInvite, NewBarber, NewBarberInvite, NewUser, PaymentPeriod, Role, User,
};
use crate::storage::{InviteBarberFields, Storage};

const INVITE_TTL_HOURS: i64 = 48;

#[derive(Debug, Clone)]
pub struct ClientSignup {
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub metadata: Option<String>,
}

/// Registers a client account. A missing password leaves the account
/// unable to log in, which is what walk-in clients created by staff get.
pub async fn create_client(store: &dyn Storage, signup: ClientSignup) -> Result<User, ApiError> {
    if signup.username.trim().is_empty() {
        return Err(ApiError::Validation("username is required".into()));
    }
    if let Some(phone) = signup.phone.as_deref() {
        if store.phone_in_use(phone).await? {
            return Err(ApiError::PhoneExists);
        }
    }
    let secret = signup.password.unwrap_or_else(|| Uuid::new_v4().to_string());
    let password_hash = hash_password(&secret)
        .map_err(|err| ApiError::Internal(format!("password hashing failed: {err}")))?;
    let user = store
        .create_user(NewUser {
            username: signup.username,
            email: signup.email,
            phone: signup.phone,
            role: Role::Client,
            password_hash,
            metadata: signup.metadata,
        })
        .await?;
    Ok(user)
}

#[derive(Debug, Clone)]
pub struct BarberAccount {
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
    pub nif: Option<String>,
    pub iban: Option<String>,
    pub payment_period: PaymentPeriod,
    pub calendar_visible: bool,
}

/// Admin path: creates the user and its barber profile directly.
pub async fn create_barber(
    store: &dyn Storage,
    account: BarberAccount,
) -> Result<(User, Barber), ApiError> {
    let password_hash = hash_password(&account.password)
        .map_err(|err| ApiError::Internal(format!("password hashing failed: {err}")))?;
    let user = store
        .create_user(NewUser {
            username: account.username,
            email: account.email,
            phone: account.phone,
            role: Role::Barber,
            password_hash,
            metadata: None,
        })
        .await?;
    let barber = store
        .create_barber(NewBarber {
            user_id: user.id,
            nif: account.nif,
            iban: account.iban,
            payment_period: account.payment_period,
            calendar_visible: account.calendar_visible,
        })
        .await?;
    Ok((user, barber))
}

/// Issues a single-use invite token valid for 48 hours.
pub async fn create_invite(
    store: &dyn Storage,
    created_by: i64,
    email: String,
) -> Result<BarberInvite, ApiError> {
    if email.trim().is_empty() {
        return Err(ApiError::Validation("email is required".into()));
    }
    let invite = store
        .create_invite(NewBarberInvite {
            token: Uuid::new_v4().to_string(),
            email,
            created_by,
            expires_at: Utc::now() + Duration::hours(INVITE_TTL_HOURS),
        })
        .await?;
    Ok(invite)
}

#[derive(Debug, Clone)]
pub struct InviteAcceptance {
    pub token: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub nif: Option<String>,
    pub iban: Option<String>,
    pub payment_period: PaymentPeriod,
}

/// Consumes an invite token and creates the barber's account. Unknown,
/// expired and already-used tokens all fail the same way.
pub async fn accept_invite(
    store: &dyn Storage,
    acceptance: InviteAcceptance,
) -> Result<(User, Barber), ApiError> {
    if acceptance.username.trim().is_empty() {
        return Err(ApiError::Validation("username is required".into()));
    }
    if acceptance.password.is_empty() {
        return Err(ApiError::Validation("password is required".into()));
    }
    let password_hash = hash_password(&acceptance.password)
        .map_err(|err| ApiError::Internal(format!("password hashing failed: {err}")))?;
    let (user, barber) = store
        .consume_invite(
            &acceptance.token,
            Utc::now(),
            NewUser {
                username: acceptance.username,
                email: acceptance.email,
                phone: acceptance.phone,
                role: Role::Barber,
                password_hash,
                metadata: None,
            },
            InviteBarberFields {
                nif: acceptance.nif,
                iban: acceptance.iban,
                payment_period: acceptance.payment_period,
            },
        )
        .await?;
    Ok((user, barber))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    async fn admin(store: &MemStorage) -> User {
        store
            .create_user(NewUser {
                username: "joana".into(),
                email: "joana@example.com".into(),
                phone: None,
                role: Role::Admin,
                password_hash: "x".into(),
                metadata: None,
            })
            .await
            .unwrap()
    }

    fn acceptance(token: &str) -> InviteAcceptance {
        InviteAcceptance {
            token: token.into(),
            username: "miguel".into(),
            email: "miguel@example.com".into(),
            password: "s3cret".into(),
            phone: None,
            nif: Some("123456789".into()),
            iban: None,
            payment_period: PaymentPeriod::Monthly,
        }
    }

    #[tokio::test]
    async fn duplicate_phone_is_reported_with_its_code() {
        let store = MemStorage::new();
        create_client(
            &store,
            ClientSignup {
                username: "carla".into(),
                email: "carla@example.com".into(),
                phone: Some("911111111".into()),
                password: Some("pw".into()),
                metadata: None,
            },
        )
        .await
        .unwrap();

        let err = create_client(
            &store,
            ClientSignup {
                username: "rui".into(),
                email: "rui@example.com".into(),
                phone: Some("911111111".into()),
                password: Some("pw".into()),
                metadata: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::PhoneExists));
    }

    #[tokio::test]
    async fn invite_is_single_use() {
        let store = MemStorage::new();
        let admin = admin(&store).await;
        let invite = create_invite(&store, admin.id, "miguel@example.com".into())
            .await
            .unwrap();

        let (user, barber) = accept_invite(&store, acceptance(&invite.token)).await.unwrap();
        assert_eq!(user.role, Role::Barber);
        assert_eq!(barber.user_id, user.id);
        assert!(barber.active);

        let mut again = acceptance(&invite.token);
        again.username = "outro".into();
        again.email = "outro@example.com".into();
        let err = accept_invite(&store, again).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let store = MemStorage::new();
        let err = accept_invite(&store, acceptance("no-such-token")).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn expired_invite_creates_nothing() {
        let store = MemStorage::new();
        let admin = admin(&store).await;
        let invite = store
            .create_invite(NewBarberInvite {
                token: "expired".into(),
                email: "miguel@example.com".into(),
                created_by: admin.id,
                expires_at: Utc::now() - Duration::hours(1),
            })
            .await
            .unwrap();

        let err = accept_invite(&store, acceptance(&invite.token)).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(store.user_by_username("miguel").await.unwrap().is_none());
    }
}
