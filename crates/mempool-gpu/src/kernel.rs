//! Kernel sources, macro options and compiled kernels

use crate::view::BufferRepresentation;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Threads per group of the compute job kernel
pub const THREAD_GROUP_SIZE: u32 = 256;

/// Macro names understood by the compute job kernel
pub mod macros {
    pub const ELEMS_PER_THREAD: &str = "ElemsPerThread_";
    pub const THREAD_ELEM_OFFSET: &str = "ThreadElemOffset_";
    pub const GROUP_ELEM_OFFSET: &str = "GroupElemOffset_";
    pub const NUM_INPUT_BUFFER_ELEMS: &str = "NumInputBufferElems_";
    pub const THREAD_ELEM_STRIDE: &str = "ThreadElemStride_";
    pub const RAW_BUFFER: &str = "RawBuffer_";
    pub const FORMATTED_BUFFER: &str = "FormattedBuffer_";
    pub const STRUCTURED_BUFFER: &str = "StructuredBuffer_";
    pub const CONSTANT_BUFFER: &str = "ConstantBuffer_";
}

/// Shader stage of a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    /// Compute shader
    Compute,
}

/// Kernel source text together with its origin
#[derive(Debug, Clone)]
pub struct KernelSource {
    /// File name the source came from
    pub file_name: &'static str,
    /// Entry point to compile
    pub entry_point: &'static str,
    /// Pipeline stage
    pub stage: ShaderStage,
    /// HLSL source text
    pub text: &'static str,
}

impl KernelSource {
    /// Compute kernel source
    pub const fn compute(file_name: &'static str, entry_point: &'static str, text: &'static str) -> Self {
        Self {
            file_name,
            entry_point,
            stage: ShaderStage::Compute,
            text,
        }
    }
}

/// Preprocessor definitions passed to the compiler
///
/// Stored sorted so the same set always hashes the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    defines: BTreeMap<String, String>,
}

impl CompileOptions {
    /// Create an empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Define an integer macro
    pub fn define_int(&mut self, name: &str, value: i64) -> &mut Self {
        self.defines.insert(name.to_string(), value.to_string());
        self
    }

    /// Define a boolean macro as 1 or 0
    pub fn define_flag(&mut self, name: &str, value: bool) -> &mut Self {
        self.defines
            .insert(name.to_string(), if value { "1" } else { "0" }.to_string());
        self
    }

    /// Raw value of a macro
    pub fn get(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }

    /// Integer value of a macro
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name)?.parse().ok()
    }

    /// Boolean value of a macro
    pub fn get_flag(&self, name: &str) -> Option<bool> {
        self.get_int(name).map(|v| v != 0)
    }

    /// Iterate over definitions in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    /// Whether no macro is defined
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }
}

/// Content hash of a compiled kernel
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelHash(pub [u8; 32]);

impl KernelHash {
    /// Hash source text, entry point and macro set
    pub fn compute(source: &KernelSource, options: &CompileOptions) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.text.as_bytes());
        hasher.update(&[0]);
        hasher.update(source.entry_point.as_bytes());
        for (name, value) in options.iter() {
            hasher.update(&[0]);
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for KernelHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for KernelHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelHash({self})")
    }
}

/// Opaque compiled kernel
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    /// Entry point the kernel was compiled from
    pub entry_point: String,
    /// Options the kernel was compiled with
    pub options: CompileOptions,
    /// Content hash
    pub hash: KernelHash,
}

/// Work shape of the compute job kernel, as fixed by its macro set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelShape {
    /// Elements each thread reads
    pub elems_per_thread: u64,
    /// Element distance between a thread's reads
    pub thread_elem_stride: u64,
    /// Element offset between consecutive groups, in units of a group's span
    pub group_elem_offset: u64,
    /// Element offset between consecutive threads, in units of a thread's span
    pub thread_elem_offset: u64,
    /// Number of float4 elements in one input copy
    pub num_input_elems: u64,
    /// How the input is bound
    pub representation: BufferRepresentation,
}

impl KernelShape {
    /// Recover the shape from a macro set
    pub fn from_options(entry_point: &str, options: &CompileOptions) -> Result<Self> {
        let int = |name: &str| -> Result<u64> {
            let value = options.get_int(name).ok_or_else(|| Error::ShaderCompile {
                entry_point: entry_point.to_string(),
                message: format!("macro {name} is not defined"),
            })?;
            u64::try_from(value).map_err(|_| Error::ShaderCompile {
                entry_point: entry_point.to_string(),
                message: format!("macro {name} is negative ({value})"),
            })
        };

        let flags = [
            (macros::RAW_BUFFER, BufferRepresentation::Raw),
            (macros::FORMATTED_BUFFER, BufferRepresentation::Formatted),
            (macros::STRUCTURED_BUFFER, BufferRepresentation::Structured),
            (macros::CONSTANT_BUFFER, BufferRepresentation::Constant),
        ];
        let mut selected = flags
            .iter()
            .filter(|(name, _)| options.get_flag(name).unwrap_or(false))
            .map(|(_, repr)| *repr);
        let representation = match (selected.next(), selected.next()) {
            (Some(repr), None) => repr,
            _ => {
                return Err(Error::ShaderCompile {
                    entry_point: entry_point.to_string(),
                    message: "exactly one buffer representation macro must be set".into(),
                });
            }
        };

        Ok(Self {
            elems_per_thread: int(macros::ELEMS_PER_THREAD)?,
            thread_elem_stride: int(macros::THREAD_ELEM_STRIDE)?,
            group_elem_offset: int(macros::GROUP_ELEM_OFFSET)?,
            thread_elem_offset: int(macros::THREAD_ELEM_OFFSET)?,
            num_input_elems: int(macros::NUM_INPUT_BUFFER_ELEMS)?,
            representation,
        })
    }

    /// Input element read by `thread` of `group` on its `i`-th iteration
    #[inline]
    pub fn element_index(&self, group: u64, thread: u64, i: u64) -> u64 {
        let base = (group * self.group_elem_offset * THREAD_GROUP_SIZE as u64
            + thread * self.thread_elem_offset)
            * self.elems_per_thread
            * self.thread_elem_stride;
        (base + i * self.thread_elem_stride) % self.num_input_elems.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: KernelSource = KernelSource::compute("Test.hlsl", "Main", "[numthreads(1,1,1)] void Main() {}");

    #[test]
    fn test_options_typed_access() {
        let mut options = CompileOptions::new();
        options.define_int("ElemsPerThread_", 4).define_flag("RawBuffer_", true);

        assert_eq!(options.get_int("ElemsPerThread_"), Some(4));
        assert_eq!(options.get_flag("RawBuffer_"), Some(true));
        assert_eq!(options.get("Missing_"), None);
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn test_hash_depends_on_options() {
        let mut a = CompileOptions::new();
        a.define_int("ElemsPerThread_", 1);
        let mut b = CompileOptions::new();
        b.define_int("ElemsPerThread_", 2);

        assert_ne!(KernelHash::compute(&SOURCE, &a), KernelHash::compute(&SOURCE, &b));
        assert_eq!(KernelHash::compute(&SOURCE, &a), KernelHash::compute(&SOURCE, &a.clone()));
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let mut a = CompileOptions::new();
        a.define_int("A_", 1).define_int("B_", 2);
        let mut b = CompileOptions::new();
        b.define_int("B_", 2).define_int("A_", 1);

        assert_eq!(KernelHash::compute(&SOURCE, &a), KernelHash::compute(&SOURCE, &b));
    }

    fn shape_options(repr_flag: &str) -> CompileOptions {
        let mut options = CompileOptions::new();
        options
            .define_int(macros::ELEMS_PER_THREAD, 2)
            .define_int(macros::THREAD_ELEM_STRIDE, 1)
            .define_int(macros::GROUP_ELEM_OFFSET, 1)
            .define_int(macros::THREAD_ELEM_OFFSET, 1)
            .define_int(macros::NUM_INPUT_BUFFER_ELEMS, 4096);
        for flag in [
            macros::RAW_BUFFER,
            macros::FORMATTED_BUFFER,
            macros::STRUCTURED_BUFFER,
            macros::CONSTANT_BUFFER,
        ] {
            options.define_flag(flag, flag == repr_flag);
        }
        options
    }

    #[test]
    fn test_shape_from_options() {
        let shape = KernelShape::from_options("ComputeJob", &shape_options(macros::STRUCTURED_BUFFER)).unwrap();
        assert_eq!(shape.elems_per_thread, 2);
        assert_eq!(shape.num_input_elems, 4096);
        assert_eq!(shape.representation, BufferRepresentation::Structured);
    }

    #[test]
    fn test_shape_requires_one_representation() {
        let mut options = shape_options(macros::RAW_BUFFER);
        options.define_flag(macros::CONSTANT_BUFFER, true);
        assert!(KernelShape::from_options("ComputeJob", &options).is_err());
    }

    #[test]
    fn test_shape_requires_every_macro() {
        let mut options = CompileOptions::new();
        options.define_flag(macros::RAW_BUFFER, true);
        let err = KernelShape::from_options("ComputeJob", &options).unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }

    #[test]
    fn test_element_index_layout() {
        let shape = KernelShape::from_options("ComputeJob", &shape_options(macros::RAW_BUFFER)).unwrap();
        // Thread 1 of group 0 starts after thread 0's two elements
        assert_eq!(shape.element_index(0, 0, 0), 0);
        assert_eq!(shape.element_index(0, 0, 1), 1);
        assert_eq!(shape.element_index(0, 1, 0), 2);
        // Group 1 starts after group 0's 256 threads
        assert_eq!(shape.element_index(1, 0, 0), 512);
        // Wraps around the input
        assert_eq!(shape.element_index(8, 0, 0), 0);
    }

    #[test]
    fn test_element_index_zero_offsets_share_elements() {
        let mut options = shape_options(macros::RAW_BUFFER);
        options
            .define_int(macros::GROUP_ELEM_OFFSET, 0)
            .define_int(macros::THREAD_ELEM_OFFSET, 0);
        let shape = KernelShape::from_options("ComputeJob", &options).unwrap();
        assert_eq!(shape.element_index(5, 17, 1), 1);
    }

    #[test]
    fn test_hash_display_is_short_hex() {
        let hash = KernelHash::compute(&SOURCE, &CompileOptions::new());
        let text = hash.to_string();
        assert_eq!(text.len(), 16);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
