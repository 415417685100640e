//! The UF2 block format.
//!
//! Every block is exactly one filesystem sector, so the loader pulls whole
//! blocks straight off the SD adapter. [`Uf2Block`] is laid out byte-exact
//! with the wire format, and so casts directly to and from a byte slice
//! (using e.g. [`bytemuck::bytes_of`]).

proc_bitfield::bitfield! {
    /// Flag word carried by every UF2 block.
    #[derive(Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
    pub struct Uf2Flags(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        pub extension_tags_present: bool @ 15,
        pub md5_present: bool @ 14,
        pub family_id_present: bool @ 13,
        pub file_container: bool @ 12,
        pub not_main_flash: bool @ 0,
    }
}

impl Uf2Flags {
    pub const EMPTY: Self = Self(0);
}

/// One block per filesystem sector.
pub const BLOCK_SIZE: usize = 512;
/// Maximum amount of data that can be carried by a block.
pub const BLOCK_DATA_SIZE: usize = 476;

/// UF2 family IDs this loader knows about.
///
/// See the RP2350 Reference Manual §5.5.3, "UF2 Targeting Rules".
pub mod family {
    pub const RP2040: u32 = 0xE48B_FF56;
    pub const ABSOLUTE: u32 = 0xE48B_FF57;
    pub const DATA: u32 = 0xE48B_FF58;
    pub const RP2350_ARM_S: u32 = 0xE48B_FF59;
    pub const RP2350_RISCV: u32 = 0xE48B_FF5A;
    pub const RP2350_ARM_NS: u32 = 0xE48B_FF5B;
}

/// Target address of the RP2350-E10 erratum workaround block (last page of
/// the 16MiB flash window). Tools prepend one ABSOLUTE-family block there so
/// the bootrom never resumes a stale partial download.
pub const ERRATUM_BLOCK_ADDR: u32 = 0x10FF_FF00;

#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Uf2Block {
    pub magic_start0: u32,
    pub magic_start1: u32,
    pub flags: Uf2Flags,
    pub target_addr: u32,
    pub payload_size: u32,
    pub block_no: u32,
    pub num_blocks: u32,
    /// Family identifier when [`Uf2Flags::family_id_present`] is set,
    /// otherwise the overall file size.
    pub file_size_or_family: u32,
    pub data: [u8; BLOCK_DATA_SIZE],
    pub magic_end: u32,
}

const _: () = assert!(core::mem::size_of::<Uf2Block>() == BLOCK_SIZE);

impl Uf2Block {
    pub const MAGIC_START0: u32 = 0x0A32_4655;
    pub const MAGIC_START1: u32 = 0x9E5D_5157;
    pub const MAGIC_END: u32 = 0x0AB1_6F30;

    /// Build a block with the given payload. Used by the authoring tool and
    /// the tests; the loader itself only ever reads blocks.
    pub fn new(
        target_addr: u32,
        block_no: u32,
        num_blocks: u32,
        family: Option<u32>,
        payload: &[u8],
    ) -> Self {
        assert!(payload.len() <= BLOCK_DATA_SIZE, "payload too long for UF2 block");
        let mut this = Self {
            magic_start0: Self::MAGIC_START0,
            magic_start1: Self::MAGIC_START1,
            flags: Uf2Flags::EMPTY.with_family_id_present(family.is_some()),
            target_addr,
            payload_size: payload.len() as u32,
            block_no,
            num_blocks,
            file_size_or_family: family.unwrap_or(0),
            data: [0; BLOCK_DATA_SIZE],
            magic_end: Self::MAGIC_END,
        };
        this.data[..payload.len()].copy_from_slice(payload);
        this
    }

    /// Decode one filesystem sector. The copy keeps the caller free of any
    /// alignment obligation on `bytes`.
    pub fn read(bytes: &[u8; BLOCK_SIZE]) -> Self {
        bytemuck::pod_read_unaligned(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn magics_ok(&self) -> bool {
        self.magic_start0 == Self::MAGIC_START0
            && self.magic_start1 == Self::MAGIC_START1
            && self.magic_end == Self::MAGIC_END
    }

    /// The family ID, when the flag says one is present.
    pub fn family_id(&self) -> Option<u32> {
        self.flags
            .family_id_present()
            .then_some(self.file_size_or_family)
    }

    /// Live payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.payload_size as usize).min(BLOCK_DATA_SIZE)]
    }

    /// True for the RP2350-E10 erratum workaround block tools prepend to a
    /// flash UF2.
    pub fn is_erratum_block(&self) -> bool {
        self.family_id() == Some(family::ABSOLUTE)
            && self.block_no == 0
            && self.target_addr == ERRATUM_BLOCK_ADDR
    }
}

/// Receive buffer for one block. The alignment satisfies both the SD DMA
/// engine and the ROM flash entry points across the two platforms.
#[repr(C, align(256))]
pub struct BlockBuf(pub [u8; BLOCK_SIZE]);

impl BlockBuf {
    pub const fn new() -> Self {
        Self([0; BLOCK_SIZE])
    }
}

impl Default for BlockBuf {
    fn default() -> Self {
        Self::new()
    }
}
