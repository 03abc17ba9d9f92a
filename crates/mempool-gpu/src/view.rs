//! Shader-visible buffer views

use crate::heap::{CONSTANT_BUFFER_ALIGNMENT, MAX_BUFFER_SIZE, MAX_CONSTANT_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of one kernel input element (a float4)
pub const INPUT_ELEMENT_SIZE: u64 = 16;

/// How the kernel sees the input buffer's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferRepresentation {
    /// Byte-addressable view
    Raw,
    /// Typed view with a 4x32-bit float format
    Formatted,
    /// Structured view with a 16-byte stride
    Structured,
    /// Root constant buffer binding
    Constant,
}

impl BufferRepresentation {
    /// All representations in declaration order
    pub const ALL: [BufferRepresentation; 4] = [
        BufferRepresentation::Raw,
        BufferRepresentation::Formatted,
        BufferRepresentation::Structured,
        BufferRepresentation::Constant,
    ];

    /// Human-readable label
    pub const fn label(self) -> &'static str {
        match self {
            BufferRepresentation::Raw => "Raw",
            BufferRepresentation::Formatted => "Formatted",
            BufferRepresentation::Structured => "Structured",
            BufferRepresentation::Constant => "Constant",
        }
    }

    /// Largest single-copy size the representation can address
    pub const fn max_size(self) -> u64 {
        match self {
            BufferRepresentation::Constant => MAX_CONSTANT_BUFFER_SIZE,
            BufferRepresentation::Raw
            | BufferRepresentation::Formatted
            | BufferRepresentation::Structured => MAX_BUFFER_SIZE,
        }
    }

    /// Required alignment of a single copy
    pub const fn alignment(self) -> u64 {
        match self {
            BufferRepresentation::Constant => CONSTANT_BUFFER_ALIGNMENT,
            BufferRepresentation::Raw
            | BufferRepresentation::Formatted
            | BufferRepresentation::Structured => 1,
        }
    }

    /// Size in bytes of one view element
    ///
    /// Raw views count 32-bit words; constant buffers have no view.
    pub const fn view_element_size(self) -> Option<u64> {
        match self {
            BufferRepresentation::Raw => Some(4),
            BufferRepresentation::Formatted | BufferRepresentation::Structured => {
                Some(INPUT_ELEMENT_SIZE)
            }
            BufferRepresentation::Constant => None,
        }
    }
}

impl fmt::Display for BufferRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Access a view grants to the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewAccess {
    /// Shader resource (read-only)
    Read,
    /// Unordered access (read-write)
    ReadWrite,
}

/// A view over a window of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewDesc {
    /// Element interpretation
    pub representation: BufferRepresentation,
    /// Read-only or unordered access
    pub access: ViewAccess,
    /// First element, in view element units
    pub first_element: u64,
    /// Number of elements, in view element units
    pub num_elements: u64,
}

impl ViewDesc {
    /// Read-only view over `num_input_elems` float4 elements starting at float4 `first_input_elem`
    pub fn input(
        representation: BufferRepresentation,
        first_input_elem: u64,
        num_input_elems: u64,
    ) -> Option<Self> {
        let element_size = representation.view_element_size()?;
        let per_input = INPUT_ELEMENT_SIZE / element_size;
        Some(Self {
            representation,
            access: ViewAccess::Read,
            first_element: first_input_elem * per_input,
            num_elements: num_input_elems * per_input,
        })
    }

    /// Unordered-access view over `num_elements` 32-bit values
    pub fn output(num_elements: u64) -> Self {
        Self {
            representation: BufferRepresentation::Raw,
            access: ViewAccess::ReadWrite,
            first_element: 0,
            num_elements,
        }
    }

    /// Byte offset of the view's first element
    pub fn byte_offset(&self) -> u64 {
        self.first_element * self.representation.view_element_size().unwrap_or(1)
    }

    /// Byte length covered by the view
    pub fn byte_len(&self) -> u64 {
        self.num_elements * self.representation.view_element_size().unwrap_or(1)
    }
}
