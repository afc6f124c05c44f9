pub mod helix;
pub mod oauth;
pub mod token;

pub use helix::{
    CreateSubscriptionRequest, HelixClient, HelixError, HelixStream, ListSubscriptionsParams,
    SubscriptionFilter, SubscriptionPage,
};
pub use oauth::{OAuthError, TokenResponse, TwitchOAuthClient};
pub use token::{AccessToken, TokenError, TokenProvider};
