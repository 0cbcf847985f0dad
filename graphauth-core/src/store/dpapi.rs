//! Windows DPAPI-protected file store.

use async_trait::async_trait;
use std::path::PathBuf;
use windows_sys::Win32::Foundation::LocalFree;
use windows_sys::Win32::Security::Cryptography::{
    CRYPT_INTEGER_BLOB, CRYPTPROTECT_UI_FORBIDDEN, CryptProtectData, CryptUnprotectData,
};
use zeroize::Zeroize;

use super::{SecureStore, StoreError, StoreMethod, run_blocking};

/// Cache blob encrypted with the current user's DPAPI key and written to a
/// file.
#[derive(Debug, Clone)]
pub struct DpapiStore {
    path: PathBuf,
}

impl DpapiStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SecureStore for DpapiStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let protected = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        run_blocking(move || unprotect(&protected)).await.map(Some)
    }

    async fn save(&self, data: &[u8]) -> Result<(), StoreError> {
        let mut plain = data.to_vec();
        let protected = run_blocking(move || {
            let result = protect(&plain);
            plain.zeroize();
            result
        })
        .await?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, protected).await?;
        Ok(())
    }

    fn method(&self) -> StoreMethod {
        StoreMethod::Dpapi
    }
}

fn input_blob(data: &[u8]) -> Result<CRYPT_INTEGER_BLOB, StoreError> {
    let len = u32::try_from(data.len()).map_err(|_| StoreError::BackendError {
        message: format!("blob of {} bytes is too large for DPAPI", data.len()),
    })?;
    Ok(CRYPT_INTEGER_BLOB {
        cbData: len,
        pbData: data.as_ptr() as *mut u8,
    })
}

fn empty_blob() -> CRYPT_INTEGER_BLOB {
    CRYPT_INTEGER_BLOB {
        cbData: 0,
        pbData: std::ptr::null_mut(),
    }
}

/// Copy a DPAPI-allocated output blob into a `Vec` and release it.
fn take_blob(blob: CRYPT_INTEGER_BLOB) -> Vec<u8> {
    if blob.pbData.is_null() {
        return Vec::new();
    }
    // SAFETY: DPAPI returned `cbData` bytes at `pbData`, allocated with
    // LocalAlloc; it is freed exactly once here.
    unsafe {
        let bytes = std::slice::from_raw_parts(blob.pbData, blob.cbData as usize).to_vec();
        LocalFree(blob.pbData.cast());
        bytes
    }
}

fn protect(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let input = input_blob(data)?;
    let mut output = empty_blob();

    // SAFETY: `input` borrows `data` for the duration of the call and
    // `output` is a valid out-pointer.
    let ok = unsafe {
        CryptProtectData(
            &input,
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            CRYPTPROTECT_UI_FORBIDDEN,
            &mut output,
        )
    };
    if ok == 0 {
        return Err(StoreError::BackendError {
            message: format!("CryptProtectData failed: {}", std::io::Error::last_os_error()),
        });
    }

    Ok(take_blob(output))
}

fn unprotect(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let input = input_blob(data)?;
    let mut output = empty_blob();

    // SAFETY: as in `protect`.
    let ok = unsafe {
        CryptUnprotectData(
            &input,
            std::ptr::null_mut(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            CRYPTPROTECT_UI_FORBIDDEN,
            &mut output,
        )
    };
    if ok == 0 {
        return Err(StoreError::AccessDenied {
            method: StoreMethod::Dpapi,
            message: format!(
                "CryptUnprotectData failed: {}",
                std::io::Error::last_os_error()
            ),
        });
    }

    Ok(take_blob(output))
}
