use std::env;

/// Decrypts a value encrypted with `lib_utils::crypt::encrypt`, reading
/// SERVICE_ENCRYPT_KEY from the environment the same way the server does.
fn main() {
    dotenvy::dotenv().ok();

    let ciphertext = env::args()
        .nth(1)
        .unwrap_or_else(|| panic!("usage: decrypt <ciphertext>"));

    match lib_utils::crypt::decrypt(&ciphertext) {
        Ok(plaintext) => println!("{plaintext}"),
        Err(e) => panic!("decrypt failed: {e}"),
    }
}
