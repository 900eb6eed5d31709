use secrecy::SecretString;

#[derive(Clone)]
pub struct GlobalArgs {
    pub token_secret: SecretString,
    pub cors_origin: String,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(token_secret: SecretString, cors_origin: String) -> Self {
        Self {
            token_secret,
            cors_origin,
        }
    }
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalArgs")
            .field("token_secret", &"***")
            .field("cors_origin", &self.cors_origin)
            .finish()
    }
}
