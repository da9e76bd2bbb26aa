//! WASAPI backend: patches the shared-mode render client's vtable.
//!
//! Opening a render client on the default endpoint yields pointers to the
//! same vtables every render client in the process uses. Redirecting three
//! slots there captures whatever the host application renders:
//!
//! - `IAudioRenderClient::GetBuffer` (slot 3)
//! - `IAudioRenderClient::ReleaseBuffer` (slot 4)
//! - `IAudioClient::Initialize` (slot 3)
//!
//! # Thread Safety
//!
//! - Hooks run on the host's audio threads and read the installed context
//!   through a process-wide read lock
//! - Only one interceptor may own the slots at a time

#![allow(unsafe_code)] // COM vtable patching requires unsafe

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use windows::core::{Interface, GUID, HRESULT};
use windows::Win32::Media::Audio::{
    eMultimedia, eRender, IAudioClient, IAudioRenderClient, IMMDeviceEnumerator,
    MMDeviceEnumerator, AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_NOPERSIST, WAVEFORMATEX,
    WAVEFORMATEXTENSIBLE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CLSCTX_ALL, COINIT_MULTITHREADED,
};
use windows::Win32::System::Memory::{
    VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS,
};

use super::{CaptureContext, Interceptor, WriteRegion};
use crate::format::{WaveFormat, WaveSubFormat};
use crate::ProbeError;

const SLOT_GET_BUFFER: usize = 3;
const SLOT_RELEASE_BUFFER: usize = 4;
const SLOT_INITIALIZE: usize = 3;

/// 1 s, in 100 ns units.
const BUFFER_DURATION_HNS: i64 = 10_000_000;

/// Size of the extension a `WAVEFORMATEXTENSIBLE` appends.
const EXTENSIBLE_CB_SIZE: u16 = 22;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

const SUBTYPE_PCM: GUID = GUID::from_u128(0x00000001_0000_0010_8000_00aa00389b71);
const SUBTYPE_IEEE_FLOAT: GUID = GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);

type GetBufferFn = unsafe extern "system" fn(*mut c_void, u32, *mut *mut u8) -> HRESULT;
type ReleaseBufferFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> HRESULT;
type InitializeFn = unsafe extern "system" fn(
    *mut c_void,
    i32,
    u32,
    i64,
    i64,
    *const WAVEFORMATEX,
    *const GUID,
) -> HRESULT;

static CONTEXT: RwLock<Option<Arc<CaptureContext>>> = parking_lot::const_rwlock(None);

// Originals stay set after removal so calls already inside a hook can finish.
static ORIGINAL_GET_BUFFER: AtomicUsize = AtomicUsize::new(0);
static ORIGINAL_RELEASE_BUFFER: AtomicUsize = AtomicUsize::new(0);
static ORIGINAL_INITIALIZE: AtomicUsize = AtomicUsize::new(0);

unsafe extern "system" fn get_buffer_hook(
    this: *mut c_void,
    frames: u32,
    data: *mut *mut u8,
) -> HRESULT {
    let original: GetBufferFn = std::mem::transmute(ORIGINAL_GET_BUFFER.load(Ordering::Acquire));
    let hr = original(this, frames, data);
    if hr.is_ok() && !data.is_null() {
        if let Some(context) = CONTEXT.read().as_ref() {
            context.on_request_buffer(WriteRegion::from_raw(*data));
        }
    }
    hr
}

unsafe extern "system" fn release_buffer_hook(this: *mut c_void, frames: u32, flags: u32) -> HRESULT {
    // Read the frames while the host still owns the buffer
    if let Some(context) = CONTEXT.read().as_ref() {
        context.on_commit_buffer(frames, None);
    }
    let original: ReleaseBufferFn =
        std::mem::transmute(ORIGINAL_RELEASE_BUFFER.load(Ordering::Acquire));
    original(this, frames, flags)
}

unsafe extern "system" fn initialize_hook(
    this: *mut c_void,
    share_mode: i32,
    stream_flags: u32,
    buffer_duration: i64,
    periodicity: i64,
    format: *const WAVEFORMATEX,
    session: *const GUID,
) -> HRESULT {
    if let Some(wave) = read_wave_format(format) {
        if let Some(context) = CONTEXT.read().as_ref() {
            context.on_negotiate_format(wave.to_audio_format());
        }
    }
    let original: InitializeFn = std::mem::transmute(ORIGINAL_INITIALIZE.load(Ordering::Acquire));
    original(
        this,
        share_mode,
        stream_flags,
        buffer_duration,
        periodicity,
        format,
        session,
    )
}

/// Copies the capture-relevant fields out of a (possibly extensible) descriptor.
unsafe fn read_wave_format(ptr: *const WAVEFORMATEX) -> Option<WaveFormat> {
    if ptr.is_null() {
        return None;
    }
    // Packed structs; copy out before touching fields
    let base = ptr.read_unaligned();
    let (tag, channels, rate, bits, cb_size) = (
        base.wFormatTag,
        base.nChannels,
        base.nSamplesPerSec,
        base.wBitsPerSample,
        base.cbSize,
    );

    if tag == WAVE_FORMAT_EXTENSIBLE && cb_size >= EXTENSIBLE_CB_SIZE {
        let extensible = ptr.cast::<WAVEFORMATEXTENSIBLE>().read_unaligned();
        let (mask, sub_format) = (extensible.dwChannelMask, extensible.SubFormat);
        let sub_format = if sub_format == SUBTYPE_IEEE_FLOAT {
            WaveSubFormat::IeeeFloat
        } else if sub_format == SUBTYPE_PCM {
            WaveSubFormat::Pcm
        } else {
            WaveSubFormat::Other
        };
        return Some(WaveFormat::extensible(channels, rate, bits, mask, sub_format));
    }

    Some(WaveFormat {
        format_tag: tag,
        ..WaveFormat::pcm(channels, rate, bits)
    })
}

/// Writes `hook` into slot `slot` of `object`'s vtable, returning the previous entry.
unsafe fn patch_slot(object: *mut c_void, slot: usize, hook: usize) -> Result<usize, ProbeError> {
    let vtable = *(object as *const *mut usize);
    let entry = vtable.add(slot);

    let mut old = PAGE_PROTECTION_FLAGS(0);
    VirtualProtect(
        entry as *const c_void,
        std::mem::size_of::<usize>(),
        PAGE_EXECUTE_READWRITE,
        &mut old,
    )
    .map_err(|e| ProbeError::PatchFailed {
        slot: slot.to_string(),
        reason: e.to_string(),
    })?;

    let previous = entry.read();
    entry.write(hook);

    let mut ignored = PAGE_PROTECTION_FLAGS(0);
    let _ = VirtualProtect(
        entry as *const c_void,
        std::mem::size_of::<usize>(),
        old,
        &mut ignored,
    );
    Ok(previous)
}

/// Clients kept open so their vtables stay mapped while patched.
struct RenderClients {
    client: IAudioClient,
    render: IAudioRenderClient,
}

// Safety: the clients are only used to locate vtables and are released on
// whichever thread drops the interceptor; the MTA allows that.
unsafe impl Send for RenderClients {}

impl RenderClients {
    unsafe fn open() -> windows::core::Result<(Self, Option<WaveFormat>)> {
        // The apartment stays initialized while the clients are held
        CoInitializeEx(None, COINIT_MULTITHREADED).ok()?;

        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;
        let device = enumerator.GetDefaultAudioEndpoint(eRender, eMultimedia)?;
        let client: IAudioClient = device.Activate(CLSCTX_ALL, None)?;

        let mix = client.GetMixFormat()?;
        let wave = read_wave_format(mix);
        let initialized = client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_NOPERSIST,
            BUFFER_DURATION_HNS,
            0,
            mix,
            None,
        );
        CoTaskMemFree(Some(mix as *const c_void));
        initialized?;

        let render: IAudioRenderClient = client.GetService()?;
        Ok((Self { client, render }, wave))
    }
}

/// Captures the host's WASAPI shared-mode rendering.
///
/// Chunks are stamped by the context's clock; the render client exposes no
/// presentation clock for the host's own streams.
#[derive(Default)]
pub struct WasapiInterceptor {
    clients: Option<RenderClients>,
}

impl WasapiInterceptor {
    /// Creates an interceptor; nothing is touched until [`Interceptor::install`].
    pub fn new() -> Self {
        Self::default()
    }

    unsafe fn patch_all(clients: &RenderClients) -> Result<(), ProbeError> {
        let render = clients.render.as_raw();
        let client = clients.client.as_raw();

        let original = patch_slot(render, SLOT_GET_BUFFER, get_buffer_hook as usize)?;
        ORIGINAL_GET_BUFFER.store(original, Ordering::Release);

        let original = match patch_slot(render, SLOT_RELEASE_BUFFER, release_buffer_hook as usize) {
            Ok(original) => original,
            Err(e) => {
                let _ = patch_slot(render, SLOT_GET_BUFFER, ORIGINAL_GET_BUFFER.load(Ordering::Acquire));
                return Err(e);
            }
        };
        ORIGINAL_RELEASE_BUFFER.store(original, Ordering::Release);

        let original = match patch_slot(client, SLOT_INITIALIZE, initialize_hook as usize) {
            Ok(original) => original,
            Err(e) => {
                Self::unpatch_render(clients);
                return Err(e);
            }
        };
        ORIGINAL_INITIALIZE.store(original, Ordering::Release);
        Ok(())
    }

    unsafe fn unpatch_render(clients: &RenderClients) {
        let render = clients.render.as_raw();
        let _ = patch_slot(render, SLOT_GET_BUFFER, ORIGINAL_GET_BUFFER.load(Ordering::Acquire));
        let _ = patch_slot(
            render,
            SLOT_RELEASE_BUFFER,
            ORIGINAL_RELEASE_BUFFER.load(Ordering::Acquire),
        );
    }
}

impl Interceptor for WasapiInterceptor {
    fn install(&mut self, context: Arc<CaptureContext>) -> Result<(), ProbeError> {
        if self.clients.is_some() {
            return Ok(());
        }
        let mut slot = CONTEXT.write();
        if slot.is_some() {
            return Err(ProbeError::AlreadyInstalled);
        }

        let (clients, mix_format) =
            unsafe { RenderClients::open() }.map_err(|e| ProbeError::CapabilityUnavailable {
                reason: e.to_string(),
            })?;

        // Streams initialized before install never pass through the hook
        if let Some(wave) = mix_format {
            context.on_negotiate_format(wave.to_audio_format());
        }
        *slot = Some(context);

        if let Err(e) = unsafe { Self::patch_all(&clients) } {
            *slot = None;
            return Err(e);
        }
        self.clients = Some(clients);
        Ok(())
    }

    fn remove(&mut self) {
        let Some(clients) = self.clients.take() else {
            return;
        };
        unsafe {
            Self::unpatch_render(&clients);
            let _ = patch_slot(
                clients.client.as_raw(),
                SLOT_INITIALIZE,
                ORIGINAL_INITIALIZE.load(Ordering::Acquire),
            );
        }
        *CONTEXT.write() = None;
    }

    fn is_installed(&self) -> bool {
        self.clients.is_some()
    }

    fn name(&self) -> &'static str {
        "wasapi"
    }
}

impl Drop for WasapiInterceptor {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};

    #[test]
    fn test_read_plain_pcm() {
        let wave = WAVEFORMATEX {
            wFormatTag: 1,
            nChannels: 2,
            nSamplesPerSec: 44_100,
            nAvgBytesPerSec: 176_400,
            nBlockAlign: 4,
            wBitsPerSample: 16,
            cbSize: 0,
        };
        let format = unsafe { read_wave_format(&wave) }.unwrap().to_audio_format();
        assert_eq!(format.sample_format, SampleFormat::I16);
        assert_eq!(format.channel_layout, ChannelLayout::Stereo);
        assert_eq!(format.sample_rate, 44_100);
    }

    #[test]
    fn test_read_null_descriptor() {
        assert!(unsafe { read_wave_format(std::ptr::null()) }.is_none());
    }
}
