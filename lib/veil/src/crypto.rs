use ctor::ctor;
use libsodium_sys;
use std::fmt;
use std::ops::Deref;

pub const PUBLIC_KEY_SIZE: usize = libsodium_sys::crypto_sign_PUBLICKEYBYTES as usize;
pub const SECRET_KEY_SIZE: usize = libsodium_sys::crypto_sign_SECRETKEYBYTES as usize;
pub const SIGNATURE_SIZE: usize = libsodium_sys::crypto_sign_BYTES as usize;
pub const CHALLENGE_SIZE: usize = 32;

/// Initialize the sodium infrastructure
#[ctor]
fn INIT_SODIUM() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("Cryptography initialization failed")
        }
    }
}

/// Fills the provided buffer with cryptographically secure random bytes.
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut ::std::ffi::c_void, out.len());
    }
}

/// Overwrites the buffer with zeroes. The write is guaranteed not to be
/// elided by the optimizer.
#[inline]
pub fn memzero(buf: &mut [u8]) {
    unsafe {
        libsodium_sys::sodium_memzero(buf.as_mut_ptr() as *mut ::std::ffi::c_void, buf.len());
    }
}

/// Generates a fresh signing key pair.
#[inline]
pub fn sign_keypair() -> ([u8; PUBLIC_KEY_SIZE], [u8; SECRET_KEY_SIZE]) {
    let mut public_key = [0u8; PUBLIC_KEY_SIZE];
    let mut secret_key = [0u8; SECRET_KEY_SIZE];

    unsafe {
        libsodium_sys::crypto_sign_keypair(public_key.as_mut_ptr(), secret_key.as_mut_ptr());
    }

    (public_key, secret_key)
}

/// Produces a detached signature over the message with the supplied secret key.
#[inline]
pub fn sign_detached(message: &[u8], secret_key: &[u8; SECRET_KEY_SIZE]) -> [u8; SIGNATURE_SIZE] {
    let mut signature = [0u8; SIGNATURE_SIZE];

    unsafe {
        libsodium_sys::crypto_sign_detached(
            signature.as_mut_ptr(),
            ::std::ptr::null_mut(),
            message.as_ptr(),
            message.len() as u64,
            secret_key.as_ptr(),
        );
    }

    signature
}

/// Verifies a detached signature against the signer's public key. Returns
/// true only if the signature covers exactly the supplied message bytes.
#[inline]
pub fn verify_detached(
    signature: &[u8; SIGNATURE_SIZE],
    message: &[u8],
    public_key: &[u8; PUBLIC_KEY_SIZE],
) -> bool {
    unsafe {
        libsodium_sys::crypto_sign_verify_detached(
            signature.as_ptr(),
            message.as_ptr(),
            message.len() as u64,
            public_key.as_ptr(),
        ) == 0
    }
}

/// Heap byte buffer that is zeroed before its memory is released.
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    #[inline]
    pub fn new(data: Vec<u8>) -> SecretBytes {
        SecretBytes(data)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SecretBytes {
    #[inline]
    fn from(data: Vec<u8>) -> SecretBytes {
        SecretBytes(data)
    }
}

impl Clone for SecretBytes {
    #[inline]
    fn clone(&self) -> SecretBytes {
        SecretBytes(self.0.clone())
    }
}

impl Deref for SecretBytes {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for SecretBytes {
    #[inline]
    fn eq(&self, other: &SecretBytes) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretBytes {}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SecretBytes({} bytes)", self.0.len())
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        memzero(&mut self.0);
    }
}
