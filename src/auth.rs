//! HTTP Basic authentication and role guards.
//!
//! Handlers declare the capability they need through an extractor argument:
//! [`AuthUser`] for any authenticated account, [`AdminUser`] for admins,
//! [`BarberUser`] for accounts with a barber identity. Routes without one of
//! these stay public.

use std::future::Future;
use std::pin::Pin;

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::basic::BasicAuth;
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::OsRng;

use crate::error::ApiError;
use crate::models::{Barber, Role};
use crate::state::AppState;
use crate::storage::Storage;

pub const AUTH_REALM: &str = "BarberDesk";

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub async fn authenticate_credentials(
    store: &dyn Storage,
    username: &str,
    password: &str,
) -> Result<Option<AuthUser>, ApiError> {
    let user = match store.user_by_username(username).await? {
        Some(user) => user,
        None => return Ok(None),
    };
    if !verify_password(password, &user.password_hash) {
        return Ok(None);
    }
    Ok(Some(AuthUser {
        id: user.id,
        username: user.username,
        role: user.role,
    }))
}

type ExtractFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>>>>;

fn app_state(req: &HttpRequest) -> Result<web::Data<AppState>, ApiError> {
    req.app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("application state missing".into()))
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = ExtractFuture<Self>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let credentials = BasicAuth::from_request(req, payload);
        let state = app_state(req);
        Box::pin(async move {
            let credentials = credentials.await.map_err(|_| ApiError::Unauthenticated)?;
            let state = state?;
            let password = credentials.password().unwrap_or_default().to_string();
            authenticate_credentials(state.store.as_ref(), credentials.user_id(), &password)
                .await?
                .ok_or(ApiError::Unauthenticated)
        })
    }
}

/// An authenticated user with the `admin` role.
#[derive(Clone, Debug)]
pub struct AdminUser(pub AuthUser);

impl FromRequest for AdminUser {
    type Error = ApiError;
    type Future = ExtractFuture<Self>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let user = AuthUser::from_request(req, payload);
        Box::pin(async move {
            let user = user.await?;
            if user.role != Role::Admin {
                return Err(ApiError::Forbidden("admin access required".into()));
            }
            Ok(AdminUser(user))
        })
    }
}

/// An authenticated user together with its barber identity.
#[derive(Clone, Debug)]
pub struct BarberUser {
    pub user: AuthUser,
    pub barber: Barber,
}

impl FromRequest for BarberUser {
    type Error = ApiError;
    type Future = ExtractFuture<Self>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let user = AuthUser::from_request(req, payload);
        let state = app_state(req);
        Box::pin(async move {
            let user = user.await?;
            let state = state?;
            if user.role != Role::Barber {
                return Err(ApiError::Forbidden("barber access required".into()));
            }
            let barber = state
                .store
                .barber_by_user(user.id)
                .await?
                .ok_or_else(|| ApiError::Forbidden("no barber profile for this account".into()))?;
            Ok(BarberUser { user, barber })
        })
    }
}
