//! Firmware to UF2 converter for the SD-boot loader.
//!
//! Produces exactly the stream the device-side validator accepts: 256-byte
//! payloads, page-aligned targets, contiguous block numbering, and (for the
//! RP2350 families) the E10 erratum workaround block up front.

use clap::{Parser, ValueEnum};
use elf::ElfBytes;
use elf::abi::PT_LOAD;
use elf::endian::LittleEndian;
use eyre::{Result, bail, ensure};
use std::path::PathBuf;

use sdboot::flash::PAGE_SIZE;
use sdboot::uf2::{ERRATUM_BLOCK_ADDR, Uf2Block, family};

fn main() -> Result<()> {
    let args = Args::parse();
    let input = std::fs::read(&args.input)?;

    let uf2 = if args.bin {
        let Some(base) = args.base else {
            bail!("--bin input needs --base <flash address>");
        };
        encode_bin(&input, base, args.family)?
    } else {
        encode_elf(&input, args.family)?
    };

    std::fs::write(&args.output, &uf2)?;
    eprintln!(
        "{}: {} blocks, {} bytes",
        args.output.display(),
        uf2.len() / sdboot::uf2::BLOCK_SIZE,
        uf2.len()
    );
    Ok(())
}

/// Command-line arguments.
#[derive(Parser)]
struct Args {
    /// Path the resulting UF2 is written to.
    #[arg(short = 'o', required = true)]
    output: PathBuf,
    /// Chip family the image targets.
    #[arg(long, value_enum, default_value = "rp2040")]
    family: Family,
    /// Treat the input as a flat binary instead of an ELF.
    #[arg(long)]
    bin: bool,
    /// Flash address of a flat binary (e.g. 0x10000000).
    #[arg(long, value_parser = parse_addr)]
    base: Option<u32>,
    /// ELF or flat binary to convert.
    input: PathBuf,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Family {
    Rp2040,
    Rp2350ArmS,
    Rp2350ArmNs,
    Rp2350Riscv,
}

impl Family {
    fn id(self) -> u32 {
        match self {
            Family::Rp2040 => family::RP2040,
            Family::Rp2350ArmS => family::RP2350_ARM_S,
            Family::Rp2350ArmNs => family::RP2350_ARM_NS,
            Family::Rp2350Riscv => family::RP2350_RISCV,
        }
    }

    /// The RP2350 bootrom wants the E10 workaround block ahead of any flash
    /// image; the RP2040 has no such erratum.
    fn wants_erratum_block(self) -> bool {
        self != Family::Rp2040
    }
}

fn parse_addr(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

/// Part of a loadable segment, pre-chunked to one flash page.
struct PageOut {
    target_addr: u32,
    data: Vec<u8>,
}

fn pages_from(base: u32, bytes: &[u8]) -> Result<Vec<PageOut>> {
    ensure!(
        base % PAGE_SIZE as u32 == 0,
        "load address {base:#010x} is not page-aligned"
    );
    Ok(bytes
        .chunks(PAGE_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let mut data = chunk.to_vec();
            data.resize(PAGE_SIZE, 0);
            PageOut {
                target_addr: base + (i * PAGE_SIZE) as u32,
                data,
            }
        })
        .collect())
}

fn emit(pages: Vec<PageOut>, fam: Family) -> Result<Vec<u8>> {
    ensure!(!pages.is_empty(), "nothing to load");
    let total: u32 = pages.len().try_into()?;

    let mut out = Vec::with_capacity((pages.len() + 1) * sdboot::uf2::BLOCK_SIZE);
    if fam.wants_erratum_block() {
        out.extend_from_slice(erratum_block().as_bytes());
    }
    for (i, page) in pages.into_iter().enumerate() {
        let block = Uf2Block::new(page.target_addr, i as u32, total, Some(fam.id()), &page.data);
        out.extend_from_slice(block.as_bytes());
    }
    Ok(out)
}

/// The RP2350-E10 workaround: a self-contained two-block ABSOLUTE-family
/// write to the last page of the flash window, so the bootrom never resumes
/// a stale partial download. The trailing extension tag marks the block as
/// carrying no real data.
fn erratum_block() -> Uf2Block {
    let mut b = Uf2Block::new(
        ERRATUM_BLOCK_ADDR,
        0,
        2,
        Some(family::ABSOLUTE),
        &[0xE5; PAGE_SIZE],
    );
    b.data[PAGE_SIZE..PAGE_SIZE + 4].copy_from_slice(&[0x04, 0xE3, 0x57, 0x99]);
    b.flags.set_extension_tags_present(true);
    b
}

/// Convert a flat binary that lives at `base` in flash.
fn encode_bin(bytes: &[u8], base: u32, fam: Family) -> Result<Vec<u8>> {
    emit(pages_from(base, bytes)?, fam)
}

/// Convert the loadable segments of an ELF. Load addresses come from the
/// physical addresses; that is where the data lives in flash.
fn encode_elf(file: &[u8], fam: Family) -> Result<Vec<u8>> {
    let elf: ElfBytes<'_, LittleEndian> = match ElfBytes::minimal_parse(file) {
        Ok(elf) => elf,
        Err(e) => bail!("not a little-endian ELF: {e}"),
    };
    let Some(segments) = elf.segments() else {
        bail!("no ELF segment table");
    };

    let mut pages = Vec::new();
    for segment in segments.iter() {
        if segment.p_type != PT_LOAD || segment.p_filesz == 0 {
            continue;
        }
        let start = usize::try_from(segment.p_offset)?;
        let len = usize::try_from(segment.p_filesz)?;
        let Some(bytes) = file.get(start..start + len) else {
            bail!("segment file range out of bounds");
        };
        let base = u32::try_from(segment.p_paddr)?;
        pages.extend(pages_from(base, bytes)?);
    }
    emit(pages, fam)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdboot::check::{Stream, Verdict};
    use sdboot::flash::XIP_BASE;
    use sdboot::target::{Rp2040Target, Rp2350Target};
    use sdboot::uf2::BLOCK_SIZE;

    const FLASH_END: u32 = XIP_BASE + 0x1C_0000;

    fn blocks_of(stream: &[u8]) -> Vec<Uf2Block> {
        stream
            .chunks(BLOCK_SIZE)
            .map(|c| Uf2Block::read(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn bin_output_passes_the_device_validator() {
        let payload = vec![0x5Au8; 3 * PAGE_SIZE + 17];
        let uf2 = encode_bin(&payload, XIP_BASE + 0x4_0000, Family::Rp2040).unwrap();

        let target = Rp2040Target::new(Some(FLASH_END));
        let mut s = Stream::new();
        for b in blocks_of(&uf2) {
            assert_eq!(s.check(&b, &target, FLASH_END), Verdict::Accept);
            s.advance();
        }
        assert!(s.complete());
        assert_eq!(s.num_blocks(), 4);
    }

    #[test]
    fn rp2350_output_leads_with_the_erratum_block() {
        let payload = vec![0u8; PAGE_SIZE];
        let uf2 = encode_bin(&payload, XIP_BASE, Family::Rp2350ArmS).unwrap();
        let blocks = blocks_of(&uf2);
        assert!(blocks[0].is_erratum_block());
        assert_eq!(blocks[0].num_blocks, 2);
        // The real image is numbered independently of the workaround block.
        assert_eq!(blocks[1].block_no, 0);
        assert_eq!(blocks[1].num_blocks, 1);

        let target = Rp2350Target::new(Some(FLASH_END));
        let mut s = Stream::new();
        for b in &blocks {
            match s.check(b, &target, FLASH_END) {
                Verdict::Accept => s.advance(),
                Verdict::Skip(_) => {}
                Verdict::Reject(r) => panic!("rejected: {r}"),
            }
        }
        assert!(s.complete());
    }

    #[test]
    fn last_page_is_padded() {
        let payload = vec![0xFFu8; PAGE_SIZE + 1];
        let uf2 = encode_bin(&payload, XIP_BASE, Family::Rp2040).unwrap();
        let blocks = blocks_of(&uf2);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].payload_size as usize, PAGE_SIZE);
        assert_eq!(blocks[1].payload()[0], 0xFF);
        assert!(blocks[1].payload()[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unaligned_base_is_refused() {
        assert!(encode_bin(&[0u8; 16], XIP_BASE + 0x10, Family::Rp2040).is_err());
    }

    #[test]
    fn addresses_parse_in_hex() {
        assert_eq!(parse_addr("0x10000000").unwrap(), 0x1000_0000);
        assert_eq!(parse_addr("10040000").unwrap(), 0x1004_0000);
        assert!(parse_addr("wat").is_err());
    }
}
