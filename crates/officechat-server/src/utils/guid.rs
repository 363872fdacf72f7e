use rand::distr::Alphanumeric;
use rand::Rng;

/// Random alphanumeric id of `len` characters.
pub fn new_guid(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
