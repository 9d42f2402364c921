use rand::distributions::Alphanumeric;
use rand::Rng as _;

/// ICE-style username/password fragment pair, regenerated for every
/// negotiation attempt.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IceCredentials {
    pub ufrag: String,
    pub pwd: String,
}

impl IceCredentials {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();

        Self {
            ufrag: sample_alphanumeric(&mut rng, 8),
            pwd: sample_alphanumeric(&mut rng, 24),
        }
    }
}

fn sample_alphanumeric(rng: &mut impl rand::Rng, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}
