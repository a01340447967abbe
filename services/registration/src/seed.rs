//! Startup seeding: the protected super admin and the default spot types.
//!
//! Existing rows are left untouched, so seeding is safe on every start.

use thiserror::Error;
use tracing::info;

use crate::auth::{CredentialError, Credentials};
use crate::config::AppSettings;
use crate::model::Role;
use crate::store::{NewSpotType, NewUser, Store, StoreError};

const SUPER_ADMIN_NICKNAME: &str = "Pete";

struct DefaultSpotType {
    name: &'static str,
    price: i64,
    limit: i64,
    description: &'static str,
}

const DEFAULT_SPOT_TYPES: [DefaultSpotType; 2] = [
    DefaultSpotType {
        name: "Hausplatz",
        price: 210,
        limit: 42,
        description: "Bekommen Matratze, Bettzeug & Handtuch im Mehrbettzimmer gestellt.",
    },
    DefaultSpotType {
        name: "Zeltplatz",
        price: 150,
        limit: 20,
        description: "Muss Zelt, Iso etc. mitbringen.",
    },
];

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

pub async fn seed(
    store: &dyn Store,
    credentials: &Credentials,
    settings: &AppSettings,
) -> Result<(), SeedError> {
    if store
        .find_user_by_username(&settings.super_admin)
        .await?
        .is_none()
    {
        store
            .insert_user(NewUser {
                username: Some(settings.super_admin.clone()),
                password_hash: Some(credentials.hash_password(&settings.admin_password)?),
                role: Role::Admin,
                nickname: SUPER_ADMIN_NICKNAME.to_string(),
                full_name: None,
                phone: None,
                is_activated: true,
                verification_token_hash: None,
                token_expires_at: None,
            })
            .await?;
        info!(username = %settings.super_admin, "created super admin");
    }

    for spot in &DEFAULT_SPOT_TYPES {
        if store.find_spot_type_by_name(spot.name).await?.is_some() {
            continue;
        }
        store
            .insert_spot_type(NewSpotType {
                name: spot.name.to_string(),
                price: spot.price,
                limit: spot.limit,
                description: Some(spot.description.to_string()),
            })
            .await?;
        info!(name = spot.name, limit = spot.limit, price = spot.price, "created spot type");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryStore::new();
        let settings = AppSettings::default();
        let credentials = Credentials::new(&settings.jwt_secret);

        seed(&store, &credentials, &settings).await.unwrap();
        seed(&store, &credentials, &settings).await.unwrap();

        let spots = store.list_spot_types().await.unwrap();
        let names: Vec<&str> = spots.iter().map(|s| s.spot_type.name.as_str()).collect();
        assert_eq!(names, vec!["Hausplatz", "Zeltplatz"]);
        assert_eq!(spots[0].spot_type.limit, 42);
        assert_eq!(spots[1].spot_type.price, 150);

        let admin = store
            .find_user_by_username("p@p.com")
            .await
            .unwrap()
            .unwrap();
        assert!(admin.user.is_admin());
        assert!(admin.user.is_activated);
        assert!(credentials
            .verify_password("TEST_PASSWORD", admin.user.password_hash.as_deref())
            .is_ok());
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }
}
