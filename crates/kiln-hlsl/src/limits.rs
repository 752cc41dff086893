//! Centralized limits for shader translation.
//!
//! Shader sources are treated as untrusted input; these bounds keep generated constant
//! buffers and register assignments within what the target APIs accept.

/// Root signature size available to a compute dispatch, in DWORDs.
pub const MAX_ROOT_SIGNATURE_DWORDS: u32 = 64;

/// DWORDs reserved for the `__x`/`__y`/`__z` dispatch extent constants.
pub const DISPATCH_CONSTANT_DWORDS: u32 = 3;

/// Bytes available for captured shader fields in a compute dispatch.
pub const MAX_COMPUTE_CAPTURED_BYTES: u32 =
    (MAX_ROOT_SIGNATURE_DWORDS - DISPATCH_CONSTANT_DWORDS) * 4;

/// D2D pixel shader constant buffers are capped at 64 KiB.
pub const MAX_D2D_CONSTANT_BUFFER_BYTES: u32 = 64 * 1024;

/// Size of a D3D constant buffer in bytes; also the cap used to size `ConstantBuffer<T>`
/// field arrays.
pub const MAX_CONSTANT_BUFFER_BYTES: u32 = 64 * 1024;

/// Inclusive upper bound of `input_count` for D2D pixel shaders.
pub const MAX_D2D_INPUT_COUNT: u32 = 8;

/// Resource texture indices must be below this value (D2D binds at most 16 textures).
pub const MAX_RESOURCE_TEXTURE_INDEX: u32 = 16;

/// Largest thread-group extent along X and Y.
pub const MAX_THREAD_GROUP_SIZE_XY: u32 = 1024;

/// Largest thread-group extent along Z.
pub const MAX_THREAD_GROUP_SIZE_Z: u32 = 64;

/// Largest total thread count of a thread group.
pub const MAX_THREADS_PER_GROUP: u32 = 1024;

/// Size of one constant buffer register (`c#`).
pub const REGISTER_BYTES: u32 = 16;
