//! C ABI for driving the staged-transaction lifecycle from other languages.
//!
//! Handles are heap-allocated Rust values passed across the boundary as raw pointers.
//! Every transforming call borrows its input handle and writes a fresh handle to its
//! output pointer, so the caller owns (and must free) both. The one exception is
//! [`t2z_finalize_and_extract`], which frees its input handle once it succeeds.
//!
//! Each failing call returns a [`ResultCode`] and records a description of the failure,
//! which [`t2z_last_error`] copies out.

use core::fmt;
use std::{
    ffi::{CStr, CString},
    os::raw::c_char,
    panic::{self, AssertUnwindSafe},
    ptr, slice,
    sync::Mutex,
};

use zcash_protocol::consensus::Network;

use crate::{
    append_signature, combine, finalize_and_extract, get_sighash, parse_inputs,
    propose_transaction, prove_transaction, roles::constructor, transparent,
    verify_before_signing, Payment, PaymentRequest, RequestError, StagedTransaction,
};

static LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

/// The outcome of a call across the C ABI.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Success = 0,
    NullPointer = 1,
    InvalidUtf8 = 2,
    BufferTooSmall = 3,
    InvalidInput = 4,
    InvalidState = 5,
    Proposal = 10,
    Prover = 11,
    Verification = 12,
    Sighash = 13,
    Signature = 14,
    Combine = 15,
    Finalization = 16,
    Parse = 17,
    NotImplemented = 99,
}

/// A payment, as passed to [`t2z_request_new`].
///
/// `memo`, `label` and `message` may be null.
#[repr(C)]
pub struct CPayment {
    pub address: *const c_char,
    pub amount: u64,
    pub memo: *const c_char,
    pub label: *const c_char,
    pub message: *const c_char,
}

/// A transparent output, as passed to [`t2z_verify_before_signing`].
#[repr(C)]
pub struct CTransparentOutput {
    pub script_pubkey: *const u8,
    pub script_pubkey_len: usize,
    pub value: u64,
}

fn set_last_error(message: String) {
    let mut last_error = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *last_error = Some(message);
}

fn fail(code: ResultCode, error: impl fmt::Display) -> ResultCode {
    tracing::debug!(?code, %error, "FFI call failed");
    set_last_error(error.to_string());
    code
}

fn null_pointer() -> ResultCode {
    fail(ResultCode::NullPointer, "a required pointer was null")
}

/// Runs `f`, converting a panic into an error instead of unwinding into the caller.
fn guard(f: impl FnOnce() -> ResultCode) -> ResultCode {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|_| fail(ResultCode::InvalidState, "internal error: panic in t2z"))
}

/// Borrows `len` elements at `ptr`, allowing a null pointer when `len` is zero.
///
/// # Safety
///
/// If `len` is non-zero and `ptr` is non-null, `ptr` must point to `len` valid elements
/// that outlive `'a`.
unsafe fn slice_from<'a, T>(ptr: *const T, len: usize) -> Option<&'a [T]> {
    if len == 0 {
        Some(&[])
    } else if ptr.is_null() {
        None
    } else {
        Some(unsafe { slice::from_raw_parts(ptr, len) })
    }
}

/// Reads a nullable C string.
///
/// # Safety
///
/// If non-null, `s` must point to a NUL-terminated string.
unsafe fn optional_str<'a>(s: *const c_char) -> Result<Option<&'a str>, ResultCode> {
    if s.is_null() {
        Ok(None)
    } else {
        unsafe { CStr::from_ptr(s) }
            .to_str()
            .map(Some)
            .map_err(|e| fail(ResultCode::InvalidUtf8, e))
    }
}

fn write_handle<T>(out: *mut *mut T, value: T) {
    // Callers check `out` for null.
    unsafe { *out = Box::into_raw(Box::new(value)) };
}

fn write_bytes(out_bytes: *mut *mut u8, out_len: *mut usize, bytes: Vec<u8>) {
    let bytes = bytes.into_boxed_slice();
    // Callers check both pointers for null.
    unsafe {
        *out_len = bytes.len();
        *out_bytes = Box::into_raw(bytes) as *mut u8;
    }
}

fn request_error(e: RequestError) -> ResultCode {
    let code = if e.is_invalid_state() {
        ResultCode::InvalidState
    } else {
        ResultCode::InvalidInput
    };
    fail(code, e)
}

/// Converts a [`CPayment`] into a [`Payment`].
///
/// # Safety
///
/// The string fields of `payment` must be null or NUL-terminated.
unsafe fn read_payment(payment: &CPayment) -> Result<Payment, ResultCode> {
    let address = unsafe { optional_str(payment.address) }?.ok_or_else(null_pointer)?;
    let mut parsed = Payment::new(address, payment.amount);
    if let Some(memo) = unsafe { optional_str(payment.memo) }? {
        parsed = parsed.with_memo(memo.as_bytes());
    }
    if let Some(label) = unsafe { optional_str(payment.label) }? {
        parsed = parsed.with_label(label);
    }
    if let Some(message) = unsafe { optional_str(payment.message) }? {
        parsed = parsed.with_message(message);
    }
    Ok(parsed)
}

/// Copies the description of the most recent failure into `buf`, NUL-terminated.
///
/// # Safety
///
/// `buf` must point to `len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn t2z_last_error(buf: *mut c_char, len: usize) -> ResultCode {
    if buf.is_null() {
        return ResultCode::NullPointer;
    }

    let message = LAST_ERROR
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .unwrap_or_default();
    let message = match CString::new(message) {
        Ok(message) => message,
        Err(_) => return ResultCode::InvalidUtf8,
    };

    let bytes = message.as_bytes_with_nul();
    if bytes.len() > len {
        return ResultCode::BufferTooSmall;
    }
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buf, bytes.len()) };
    ResultCode::Success
}

/// Builds a payment request from `n` payments.
///
/// # Safety
///
/// - `payments` must point to `n` valid [`CPayment`]s, whose string fields are null or
///   NUL-terminated.
/// - `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn t2z_request_new(
    payments: *const CPayment,
    n: usize,
    out: *mut *mut PaymentRequest,
) -> ResultCode {
    guard(|| {
        if out.is_null() {
            return null_pointer();
        }
        let Some(payments) = (unsafe { slice_from(payments, n) }) else {
            return null_pointer();
        };

        let mut parsed = Vec::with_capacity(payments.len());
        for payment in payments {
            match unsafe { read_payment(payment) } {
                Ok(payment) => parsed.push(payment),
                Err(code) => return code,
            }
        }

        match PaymentRequest::new(parsed) {
            Ok(request) => {
                write_handle(out, request);
                ResultCode::Success
            }
            Err(e) => request_error(e),
        }
    })
}

/// Sets the target height of an unconsumed request.
///
/// # Safety
///
/// `request` must be a live handle from [`t2z_request_new`].
#[no_mangle]
pub unsafe extern "C" fn t2z_request_set_target_height(
    request: *mut PaymentRequest,
    height: u32,
) -> ResultCode {
    guard(|| match unsafe { request.as_mut() } {
        None => null_pointer(),
        Some(request) => match request.set_target_height(height) {
            Ok(()) => ResultCode::Success,
            Err(e) => request_error(e),
        },
    })
}

/// Selects mainnet (`true`) or testnet (`false`) for an unconsumed request.
///
/// # Safety
///
/// `request` must be a live handle from [`t2z_request_new`].
#[no_mangle]
pub unsafe extern "C" fn t2z_request_set_use_mainnet(
    request: *mut PaymentRequest,
    use_mainnet: bool,
) -> ResultCode {
    let network = if use_mainnet {
        Network::MainNetwork
    } else {
        Network::TestNetwork
    };
    guard(|| match unsafe { request.as_mut() } {
        None => null_pointer(),
        Some(request) => match request.set_network(network) {
            Ok(()) => ResultCode::Success,
            Err(e) => request_error(e),
        },
    })
}

/// Frees a request handle. Null is ignored.
///
/// # Safety
///
/// `request` must be null or a live handle from [`t2z_request_new`].
#[no_mangle]
pub unsafe extern "C" fn t2z_request_free(request: *mut PaymentRequest) {
    if !request.is_null() {
        drop(unsafe { Box::from_raw(request) });
    }
}

/// Builds a staged transaction spending the encoded `inputs` to pay `request`.
///
/// On success `request` is consumed: it can still be read, but no longer changed.
///
/// # Safety
///
/// - `inputs` must point to `len` readable bytes.
/// - `request` must be a live handle from [`t2z_request_new`].
/// - `change_address` must be a NUL-terminated string.
/// - `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn t2z_propose(
    inputs: *const u8,
    len: usize,
    request: *mut PaymentRequest,
    change_address: *const c_char,
    out: *mut *mut StagedTransaction,
) -> ResultCode {
    guard(|| {
        let (Some(inputs), Some(request)) = (unsafe { slice_from(inputs, len) }, unsafe {
            request.as_mut()
        }) else {
            return null_pointer();
        };
        if out.is_null() {
            return null_pointer();
        }
        let change_address = match unsafe { optional_str(change_address) } {
            Ok(Some(change_address)) => change_address,
            Ok(None) => return null_pointer(),
            Err(code) => return code,
        };

        let inputs = match parse_inputs(inputs) {
            Ok(inputs) => inputs,
            Err(e) => return fail(ResultCode::InvalidInput, e),
        };

        match propose_transaction(&inputs, request, change_address) {
            Ok(tx) => {
                write_handle(out, tx);
                ResultCode::Success
            }
            Err(e @ constructor::Error::RequestConsumed) => fail(ResultCode::InvalidState, e),
            Err(e) if e.is_unsupported_address() => fail(ResultCode::NotImplemented, e),
            Err(e) => fail(ResultCode::Proposal, e),
        }
    })
}

/// Fills every empty proof slot of `tx`.
///
/// # Safety
///
/// `tx` must be a live staged transaction handle, and `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn t2z_prove(
    tx: *const StagedTransaction,
    out: *mut *mut StagedTransaction,
) -> ResultCode {
    guard(|| {
        let Some(tx) = (unsafe { tx.as_ref() }) else {
            return null_pointer();
        };
        if out.is_null() {
            return null_pointer();
        }
        match prove_transaction(tx) {
            Ok(proven) => {
                write_handle(out, proven);
                ResultCode::Success
            }
            Err(e) => fail(ResultCode::Prover, e),
        }
    })
}

/// Checks `tx` against `request` and the `n` expected change outputs.
///
/// # Safety
///
/// - `tx` and `request` must be live handles.
/// - `expected_change` must point to `n` valid [`CTransparentOutput`]s, and may be null
///   when `n` is zero.
#[no_mangle]
pub unsafe extern "C" fn t2z_verify_before_signing(
    tx: *const StagedTransaction,
    request: *const PaymentRequest,
    expected_change: *const CTransparentOutput,
    n: usize,
) -> ResultCode {
    guard(|| {
        let (Some(tx), Some(request), Some(expected_change)) = (unsafe {
            (
                tx.as_ref(),
                request.as_ref(),
                slice_from(expected_change, n),
            )
        }) else {
            return null_pointer();
        };

        let mut change = Vec::with_capacity(expected_change.len());
        for output in expected_change {
            let Some(script_pubkey) =
                (unsafe { slice_from(output.script_pubkey, output.script_pubkey_len) })
            else {
                return null_pointer();
            };
            change.push(transparent::Output::new(output.value, script_pubkey.to_vec()));
        }

        match verify_before_signing(tx, request, &change) {
            Ok(()) => ResultCode::Success,
            Err(e) => fail(ResultCode::Verification, e),
        }
    })
}

/// Writes the signature hash of the transparent input at `index` to `out`.
///
/// # Safety
///
/// `tx` must be a live handle, and `out` must be valid for writing 32 bytes.
#[no_mangle]
pub unsafe extern "C" fn t2z_get_sighash(
    tx: *const StagedTransaction,
    index: usize,
    out: *mut [u8; 32],
) -> ResultCode {
    guard(|| {
        let Some(tx) = (unsafe { tx.as_ref() }) else {
            return null_pointer();
        };
        if out.is_null() {
            return null_pointer();
        }
        match get_sighash(tx, index) {
            Ok(sighash) => {
                unsafe { *out = sighash };
                ResultCode::Success
            }
            Err(e) => fail(ResultCode::Sighash, e),
        }
    })
}

/// Attaches a 64-byte compact ECDSA signature to the transparent input at `index`.
///
/// # Safety
///
/// `tx` must be a live handle, `signature` must point to 64 readable bytes, and `out`
/// must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn t2z_append_signature(
    tx: *const StagedTransaction,
    index: usize,
    signature: *const [u8; 64],
    out: *mut *mut StagedTransaction,
) -> ResultCode {
    guard(|| {
        let (Some(tx), Some(signature)) = (unsafe { tx.as_ref() }, unsafe { signature.as_ref() })
        else {
            return null_pointer();
        };
        if out.is_null() {
            return null_pointer();
        }
        match append_signature(tx, index, signature) {
            Ok(signed) => {
                write_handle(out, signed);
                ResultCode::Success
            }
            Err(e) => fail(ResultCode::Signature, e),
        }
    })
}

/// Merges `n` copies of the same staged transaction.
///
/// # Safety
///
/// `txs` must point to `n` live handles, and `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn t2z_combine(
    txs: *const *const StagedTransaction,
    n: usize,
    out: *mut *mut StagedTransaction,
) -> ResultCode {
    guard(|| {
        let Some(handles) = (unsafe { slice_from(txs, n) }) else {
            return null_pointer();
        };
        if out.is_null() {
            return null_pointer();
        }

        let mut copies = Vec::with_capacity(handles.len());
        for handle in handles {
            match unsafe { handle.as_ref() } {
                Some(tx) => copies.push(tx.clone()),
                None => return null_pointer(),
            }
        }

        match combine(&copies) {
            Ok(combined) => {
                write_handle(out, combined);
                ResultCode::Success
            }
            Err(e) => fail(ResultCode::Combine, e),
        }
    })
}

/// Finalizes `tx` and writes the raw transaction to a new buffer.
///
/// On success `tx` is freed and must not be used again; free the buffer with
/// [`t2z_free_bytes`]. On failure `tx` is left untouched.
///
/// # Safety
///
/// `tx` must be a live handle, and both output pointers must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn t2z_finalize_and_extract(
    tx: *mut StagedTransaction,
    out_bytes: *mut *mut u8,
    out_len: *mut usize,
) -> ResultCode {
    guard(|| {
        let Some(staged) = (unsafe { tx.as_ref() }) else {
            return null_pointer();
        };
        if out_bytes.is_null() || out_len.is_null() {
            return null_pointer();
        }
        match finalize_and_extract(staged) {
            Ok(bytes) => {
                write_bytes(out_bytes, out_len, bytes);
                drop(unsafe { Box::from_raw(tx) });
                ResultCode::Success
            }
            Err(e) => fail(ResultCode::Finalization, e),
        }
    })
}

/// Serializes `tx` into a new buffer, to be freed with [`t2z_free_bytes`].
///
/// # Safety
///
/// `tx` must be a live handle, and both output pointers must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn t2z_serialize(
    tx: *const StagedTransaction,
    out_bytes: *mut *mut u8,
    out_len: *mut usize,
) -> ResultCode {
    guard(|| {
        let Some(tx) = (unsafe { tx.as_ref() }) else {
            return null_pointer();
        };
        if out_bytes.is_null() || out_len.is_null() {
            return null_pointer();
        }
        write_bytes(out_bytes, out_len, tx.serialize());
        ResultCode::Success
    })
}

/// Parses a staged transaction from `len` bytes.
///
/// # Safety
///
/// `bytes` must point to `len` readable bytes, and `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn t2z_parse(
    bytes: *const u8,
    len: usize,
    out: *mut *mut StagedTransaction,
) -> ResultCode {
    guard(|| {
        let Some(bytes) = (unsafe { slice_from(bytes, len) }) else {
            return null_pointer();
        };
        if out.is_null() {
            return null_pointer();
        }
        match StagedTransaction::parse(bytes) {
            Ok(tx) => {
                write_handle(out, tx);
                ResultCode::Success
            }
            Err(e) => fail(ResultCode::Parse, e),
        }
    })
}

/// Frees a staged transaction handle. Null is ignored.
///
/// # Safety
///
/// `tx` must be null or a live staged transaction handle.
#[no_mangle]
pub unsafe extern "C" fn t2z_free(tx: *mut StagedTransaction) {
    if !tx.is_null() {
        drop(unsafe { Box::from_raw(tx) });
    }
}

/// Frees a buffer returned by this library. Null is ignored.
///
/// # Safety
///
/// `ptr` and `len` must be exactly as returned by this library.
#[no_mangle]
pub unsafe extern "C" fn t2z_free_bytes(ptr: *mut u8, len: usize) {
    if !ptr.is_null() {
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)) });
    }
}

#[cfg(test)]
mod tests {
    use std::{ffi::CString, os::raw::c_char, ptr};

    use zcash_protocol::consensus::NetworkType;
    use zcash_address::ToAddress;

    use super::*;
    use crate::{
        serialize_inputs,
        testing::{input_for_key, sign_compact, transparent_address, TEST_KEYS},
    };

    fn last_error() -> String {
        let mut buf = [0 as c_char; 512];
        assert_eq!(
            unsafe { t2z_last_error(buf.as_mut_ptr(), buf.len()) },
            ResultCode::Success
        );
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    fn new_request(address: &CString, amount: u64) -> *mut PaymentRequest {
        let payment = CPayment {
            address: address.as_ptr(),
            amount,
            memo: ptr::null(),
            label: ptr::null(),
            message: ptr::null(),
        };
        let mut request = ptr::null_mut();
        assert_eq!(
            unsafe { t2z_request_new(&payment, 1, &mut request) },
            ResultCode::Success
        );
        request
    }

    #[test]
    fn transparent_lifecycle() {
        let recipient = CString::new(transparent_address(NetworkType::Test, [0x11; 20])).unwrap();
        let change = CString::new(transparent_address(NetworkType::Test, [0xcc; 20])).unwrap();
        let inputs = serialize_inputs(&[input_for_key(&TEST_KEYS[0], 0, 200_000)]).unwrap();

        let request = new_request(&recipient, 50_000);
        assert_eq!(
            unsafe { t2z_request_set_target_height(request, 3_000_000) },
            ResultCode::Success
        );

        let mut tx = ptr::null_mut();
        assert_eq!(
            unsafe {
                t2z_propose(
                    inputs.as_ptr(),
                    inputs.len(),
                    request,
                    change.as_ptr(),
                    &mut tx,
                )
            },
            ResultCode::Success
        );

        // The request can no longer be changed, but can still be used for verifying.
        assert_eq!(
            unsafe { t2z_request_set_use_mainnet(request, true) },
            ResultCode::InvalidState
        );

        let mut proven = ptr::null_mut();
        assert_eq!(unsafe { t2z_prove(tx, &mut proven) }, ResultCode::Success);

        let change_script = crate::transparent::p2pkh_script(&[0xcc; 20]);
        let expected_change = CTransparentOutput {
            script_pubkey: change_script.as_ptr(),
            script_pubkey_len: change_script.len(),
            value: 140_000,
        };
        assert_eq!(
            unsafe { t2z_verify_before_signing(proven, request, &expected_change, 1) },
            ResultCode::Success
        );
        assert_eq!(
            unsafe { t2z_verify_before_signing(proven, request, ptr::null(), 0) },
            ResultCode::Verification
        );

        let mut sighash = [0; 32];
        assert_eq!(
            unsafe { t2z_get_sighash(proven, 0, &mut sighash) },
            ResultCode::Success
        );
        assert_eq!(
            unsafe { t2z_get_sighash(proven, 1, &mut sighash) },
            ResultCode::Sighash
        );
        let signature = sign_compact(&TEST_KEYS[0], &sighash);

        let mut signed = ptr::null_mut();
        assert_eq!(
            unsafe { t2z_append_signature(proven, 0, &signature, &mut signed) },
            ResultCode::Success
        );

        let (mut bytes, mut len) = (ptr::null_mut(), 0);
        assert_eq!(
            unsafe { t2z_serialize(signed, &mut bytes, &mut len) },
            ResultCode::Success
        );
        let mut parsed = ptr::null_mut();
        assert_eq!(
            unsafe { t2z_parse(bytes, len, &mut parsed) },
            ResultCode::Success
        );
        assert_eq!(unsafe { &*parsed }, unsafe { &*signed });
        unsafe { t2z_free_bytes(bytes, len) };

        // Extraction fails on the unsigned handle, leaving it alive.
        let (mut raw, mut raw_len) = (ptr::null_mut(), 0);
        assert_eq!(
            unsafe { t2z_finalize_and_extract(proven, &mut raw, &mut raw_len) },
            ResultCode::Finalization
        );

        assert_eq!(
            unsafe { t2z_finalize_and_extract(parsed, &mut raw, &mut raw_len) },
            ResultCode::Success
        );
        assert!(raw_len > 0);

        unsafe {
            t2z_free_bytes(raw, raw_len);
            t2z_free(signed);
            t2z_free(proven);
            t2z_free(tx);
            t2z_request_free(request);
        }
    }

    #[test]
    fn failures_map_to_codes() {
        let mut tx = ptr::null_mut();
        assert_eq!(
            unsafe { t2z_parse(ptr::null(), 4, &mut tx) },
            ResultCode::NullPointer
        );
        assert_eq!(
            unsafe { t2z_parse(b"junk".as_ptr(), 4, &mut tx) },
            ResultCode::Parse
        );
        assert!(tx.is_null());
        assert!(!last_error().is_empty());

        let mut request = ptr::null_mut();
        assert_eq!(
            unsafe { t2z_request_new(ptr::null(), 0, &mut request) },
            ResultCode::InvalidInput
        );

        let mut combined = ptr::null_mut();
        assert_eq!(
            unsafe { t2z_combine(ptr::null(), 0, &mut combined) },
            ResultCode::Combine
        );

        let sapling =
            CString::new(zcash_address::ZcashAddress::from_sapling(NetworkType::Test, [7; 43]).encode())
                .unwrap();
        let change = CString::new(transparent_address(NetworkType::Test, [0xcc; 20])).unwrap();
        let inputs = serialize_inputs(&[input_for_key(&TEST_KEYS[0], 0, 200_000)]).unwrap();
        let request = new_request(&sapling, 10_000);
        assert_eq!(
            unsafe {
                t2z_propose(
                    inputs.as_ptr(),
                    inputs.len(),
                    request,
                    change.as_ptr(),
                    &mut tx,
                )
            },
            ResultCode::NotImplemented
        );
        assert_eq!(
            unsafe { t2z_propose(inputs.as_ptr(), 3, request, change.as_ptr(), &mut tx) },
            ResultCode::InvalidInput
        );
        unsafe { t2z_request_free(request) };
    }

    #[test]
    fn last_error_needs_room() {
        let mut tx = ptr::null_mut();
        assert_eq!(
            unsafe { t2z_parse(b"junk".as_ptr(), 4, &mut tx) },
            ResultCode::Parse
        );

        let mut buf = [0 as c_char; 1];
        assert_eq!(
            unsafe { t2z_last_error(buf.as_mut_ptr(), buf.len()) },
            ResultCode::BufferTooSmall
        );
        assert_eq!(
            unsafe { t2z_last_error(ptr::null_mut(), 0) },
            ResultCode::NullPointer
        );
    }
}
