#[derive(Debug, thiserror::Error)]
#[error("Overflow while attempting to determine the bus address for register {register} at offset {offset:#x} from base address {base_address:#x}")]
pub struct RegisterAddressOutOfBounds {
    register: &'static str,
    base_address: u32,
    offset: u32,
}

/// A memory mapped debug register, addressed as a byte offset from the base
/// of the debug register block on the debug bus.
pub trait MemoryMappedRegister<T>: Clone + From<T> + Into<T> + Sized + std::fmt::Debug {
    /// The register's offset from the debug base address, in bytes.
    const ADDRESS_OFFSET: u32;
    /// The register's name.
    const NAME: &'static str;

    /// Get the register's bus address for a debug block rooted at `base_address`.
    fn get_mmio_address_from_base(base_address: u32) -> Result<u32, RegisterAddressOutOfBounds> {
        if let Some(mmio_address) = base_address.checked_add(Self::ADDRESS_OFFSET) {
            Ok(mmio_address)
        } else {
            Err(RegisterAddressOutOfBounds {
                register: Self::NAME,
                base_address,
                offset: Self::ADDRESS_OFFSET,
            })
        }
    }
}

/// Create a [`MemoryMappedRegister`] type backed by a [`bitfield::bitfield!`]
/// mapping, with `From` conversions in both directions.
///
/// # Example
/// ```
/// use cortexa_debug::memory_mapped_bitfield_register;
/// memory_mapped_bitfield_register! {
///     /// Debug Status and Control Register
///     pub struct Example(u32);
///     0x088, "DBGDSCR",
///     impl From;
///     pub halted, _: 0;
///     pub moe, _: 5, 2;
/// }
/// ```
#[macro_export]
macro_rules! memory_mapped_bitfield_register {
    ($(#[$outer:meta])* $visibility:vis struct $struct_name:ident($reg_type:ty); $addr:expr, $reg_name:expr, impl From; $($rest:tt)*) => {
        $crate::memory_mapped_bitfield_register!{
            $(#[$outer])* $visibility struct $struct_name($reg_type); $addr, $reg_name, $($rest)*
        }

        impl From<$struct_name> for $reg_type {
            fn from(register: $struct_name) -> Self {
                register.0
            }
        }

        impl From<$reg_type> for $struct_name {
            fn from(value: $reg_type) -> Self {
                Self(value)
            }
        }
    };
    ($(#[$outer:meta])* $vis_modifier:vis struct $struct_name:ident($reg_type:ty); $addr:expr, $reg_name:expr, $($rest:tt)*) => {
        bitfield::bitfield!{
            $(#[$outer])*
            #[doc= concat!("A [`bitfield::bitfield!`] register mapping for the register `",  $reg_name, "` at offset `", stringify!($addr), "` from the debug base.")]
            #[derive(Copy, Clone)]
            #[allow(clippy::upper_case_acronyms)]
            #[allow(non_camel_case_types)]
            ($vis_modifier) struct $struct_name($reg_type);
            impl Debug;
            $($rest)*
        }

        impl $crate::memory_mapped_registers::MemoryMappedRegister<$reg_type> for $struct_name {
            const ADDRESS_OFFSET: u32 = $addr;
            const NAME: &'static str = $reg_name;
        }
    };
}
