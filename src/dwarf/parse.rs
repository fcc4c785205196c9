//! Parsing of `.eh_frame` call frame information.
//!
//! Source: https://dwarfstd.org/doc/DWARF5.pdf §6.4 Call Frame Information and
//! <https://refspecs.linuxbase.org/LSB_5.0.0/LSB-Core-generic/LSB-Core-generic/ehframechpt.html>
//!
//! The section is a sequence of entries, each either a Common Information
//! Entry (CIE) or a Frame Description Entry (FDE). Every FDE points back to
//! the CIE it shares its initial instructions and encodings with.
#![allow(non_upper_case_globals)]


use alloc::{format, string::String};
use core::{ffi::CStr, fmt};

/// The dwarf is invalid or uses something we don't support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error(pub(crate) String);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// How encoded pointers are resolved, on top of the encoding itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerContext {
    /// Size of `DW_EH_PE_absptr` values.
    pub address_size: u8,
    /// Base for `DW_EH_PE_datarel` values (the `.got` or `.eh_frame_hdr`).
    pub data_base: Option<u64>,
}

impl Default for PointerContext {
    fn default() -> Self {
        Self {
            address_size: 8,
            data_base: None,
        }
    }
}

/// A `.eh_frame` section and the address its first byte is loaded at.
#[derive(Debug, Clone, Copy)]
pub struct EhFrame<'a> {
    pub data: &'a [u8],
    pub address: u64,
    pub pointers: PointerContext,
}

/// Bytes we are reading from, plus the address of the first one so that
/// pc-relative pointers can be resolved.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    pub(crate) data: &'a [u8],
    pub(crate) addr: u64,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8], addr: u64) -> Self {
        Self { data, addr }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Splits off the next `amount` bytes into their own cursor.
    fn split(&mut self, amount: usize) -> Result<Cursor<'a>> {
        let addr = self.addr;
        let data = read_bytes(self, amount)?;
        Ok(Cursor { data, addr })
    }
}

/// Returns the decoded pointer.
pub(crate) fn read_encoded(
    data: &mut Cursor<'_>,
    encoding: Encoding,
    ctx: &PointerContext,
) -> Result<u64> {
    if encoding.is_indirect() {
        return Err(Error(format!("indirect pointers are not supported: {encoding:?}")));
    }
    let pc = data.addr;

    let value = match encoding.format()? {
        ValueFormat::DW_EH_PE_absptr => match ctx.address_size {
            4 => u64::from(read_u32(data)?),
            8 => read_u64(data)?,
            size => return Err(Error(format!("unsupported address size {size}"))),
        },
        ValueFormat::DW_EH_PE_uleb128 => read_uleb128(data)?,
        ValueFormat::DW_EH_PE_udata2 => u64::from(read_u16(data)?),
        ValueFormat::DW_EH_PE_udata4 => u64::from(read_u32(data)?),
        ValueFormat::DW_EH_PE_udata8 => read_u64(data)?,
        ValueFormat::DW_EH_PE_sleb128 => read_ileb128(data)? as u64,
        ValueFormat::DW_EH_PE_sdata2 => read_u16(data)? as i16 as i64 as u64,
        ValueFormat::DW_EH_PE_sdata4 => read_u32(data)? as i32 as i64 as u64,
        ValueFormat::DW_EH_PE_sdata8 => read_u64(data)?,
    };

    let value = match encoding.application()? {
        ValueApplication::DW_EH_PE_absptr => value,
        ValueApplication::DW_EH_PE_pcrel => pc.wrapping_add(value),
        ValueApplication::DW_EH_PE_datarel => {
            let base = ctx
                .data_base
                .ok_or_else(|| Error("datarel pointer without a data base".into()))?;
            base.wrapping_add(value)
        }
        app @ (ValueApplication::DW_EH_PE_textrel
        | ValueApplication::DW_EH_PE_funcrel
        | ValueApplication::DW_EH_PE_aligned) => {
            return Err(Error(format!("unsupported pointer application {app:?}")))
        }
    };

    Ok(value)
}

#[derive(PartialEq, Eq, Clone, Copy)]
#[repr(transparent)]
pub struct Encoding(pub(crate) u8);

impl Encoding {
    pub(crate) const DW_EH_PE_omit: Encoding = Encoding(0xff);
    pub(crate) const DW_EH_PE_absptr: Encoding = Encoding(0x00);

    pub(crate) fn is_omit(&self) -> bool {
        *self == Self::DW_EH_PE_omit
    }

    fn is_indirect(&self) -> bool {
        self.0 & 0x80 != 0
    }

    fn format(&self) -> Result<ValueFormat> {
        Ok(match self.0 & 0b1111 {
            0x00 => ValueFormat::DW_EH_PE_absptr,
            0x01 => ValueFormat::DW_EH_PE_uleb128,
            0x02 => ValueFormat::DW_EH_PE_udata2,
            0x03 => ValueFormat::DW_EH_PE_udata4,
            0x04 => ValueFormat::DW_EH_PE_udata8,
            0x09 => ValueFormat::DW_EH_PE_sleb128,
            0x0A => ValueFormat::DW_EH_PE_sdata2,
            0x0B => ValueFormat::DW_EH_PE_sdata4,
            0x0C => ValueFormat::DW_EH_PE_sdata8,
            v => return Err(Error(format!("invalid pointer value format: {v:#x}"))),
        })
    }

    fn application(&self) -> Result<ValueApplication> {
        Ok(match (self.0 & 0x70) >> 4 {
            0x0 => ValueApplication::DW_EH_PE_absptr,
            0x1 => ValueApplication::DW_EH_PE_pcrel,
            0x2 => ValueApplication::DW_EH_PE_textrel,
            0x3 => ValueApplication::DW_EH_PE_datarel,
            0x4 => ValueApplication::DW_EH_PE_funcrel,
            0x5 => ValueApplication::DW_EH_PE_aligned,
            v => return Err(Error(format!("invalid pointer value application: {v:#x}"))),
        })
    }

    /// The same format, but applied as an absolute value. Used for things like
    /// the FDE address range, which is a length and not a pointer.
    fn format_only(&self) -> Encoding {
        Encoding(self.0 & 0x0f)
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_omit() {
            return f.write_str("DW_EH_PE_omit");
        }
        match (self.application(), self.format()) {
            (Ok(app), Ok(format)) => write!(f, "{app:?} | {format:?}"),
            _ => write!(f, "Encoding({:#x})", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[allow(non_camel_case_types)]
enum ValueFormat {
    /// A pointer sized value.
    DW_EH_PE_absptr,
    /// Unsigned value is encoded using the Little Endian Base 128 (LEB128) as
    /// defined by DWARF Debugging Information Format, Revision 2.0.0 (July 27,
    /// 1993).
    DW_EH_PE_uleb128,
    DW_EH_PE_udata2,
    DW_EH_PE_udata4,
    DW_EH_PE_udata8,
    /// Signed value is encoded using the Little Endian Base 128 (LEB128) as
    /// defined by DWARF Debugging Information Format, Revision 2.0.0 (July 27,
    /// 1993).
    DW_EH_PE_sleb128,
    DW_EH_PE_sdata2,
    DW_EH_PE_sdata4,
    DW_EH_PE_sdata8,
}

#[derive(Debug, Clone, Copy)]
#[allow(non_camel_case_types)]
enum ValueApplication {
    DW_EH_PE_absptr,
    ///	Value is relative to the current program counter.
    DW_EH_PE_pcrel,
    ///	Value is relative to the beginning of the .text section.
    DW_EH_PE_textrel,
    ///	Value is relative to the beginning of the .got or .eh_frame_hdr
    /// section.
    DW_EH_PE_datarel,
    ///	Value is relative to the beginning of the function.
    DW_EH_PE_funcrel,
    ///	Value is aligned to an address unit sized boundary.
    DW_EH_PE_aligned,
}

fn read_bytes<'a>(data: &mut Cursor<'a>, amount: usize) -> Result<&'a [u8]> {
    if data.data.len() < amount {
        return Err(Error(format!(
            "index out of bounds, tried to read {amount} bytes from {}",
            data.data.len()
        )));
    }
    let (result, rest) = data.data.split_at(amount);
    data.data = rest;
    data.addr = data.addr.wrapping_add(amount as u64);
    Ok(result)
}

fn read_array<const N: usize>(data: &mut Cursor<'_>) -> Result<[u8; N]> {
    let bytes = read_bytes(data, N)?;
    let mut out = [0; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub(crate) fn read_u8(data: &mut Cursor<'_>) -> Result<u8> {
    Ok(read_array::<1>(data)?[0])
}

pub(crate) fn read_u16(data: &mut Cursor<'_>) -> Result<u16> {
    read_array(data).map(u16::from_le_bytes)
}

pub(crate) fn read_u32(data: &mut Cursor<'_>) -> Result<u32> {
    read_array(data).map(u32::from_le_bytes)
}

pub(crate) fn read_u64(data: &mut Cursor<'_>) -> Result<u64> {
    read_array(data).map(u64::from_le_bytes)
}

fn read_utf8_cstr<'a>(data: &mut Cursor<'a>) -> Result<&'a str> {
    let cstr: &CStr = CStr::from_bytes_until_nul(data.data)
        .map_err(|_| Error("no null terminator found for string".into()))?;
    let utf8 = cstr
        .to_str()
        .map_err(|e| Error(format!("invalid utf8: {e:?}")))?;
    read_bytes(data, utf8.len() + 1)?;
    Ok(utf8)
}

pub(crate) fn read_uleb128(data: &mut Cursor<'_>) -> Result<u64> {
    let mut result = 0;
    let mut shift = 0;
    loop {
        let byte = read_u8(data)?;
        let low = u64::from(byte & 0b0111_1111);
        if shift >= 64 || (shift == 63 && low > 1) {
            return Err(Error("uleb128 does not fit into 64 bits".into()));
        }
        result |= low << shift;
        if (byte >> 7) == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

pub(crate) fn read_ileb128(data: &mut Cursor<'_>) -> Result<i64> {
    let mut result = 0;
    let mut shift = 0;

    let last = loop {
        let byte = read_u8(data)?;
        if shift >= 64 || (shift == 63 && byte != 0x00 && byte != 0x7f) {
            return Err(Error("sleb128 does not fit into 64 bits".into()));
        }
        result |= i64::from(byte & 0b0111_1111) << shift;
        shift += 7;
        if (byte >> 7) == 0 {
            break byte;
        }
    };
    let sign_bit_set = ((last >> 6) & 1) == 1;
    if shift < 64 && sign_bit_set {
        result |= -1 << shift;
    }
    Ok(result)
}

/// Common Information Entry
#[derive(Debug, PartialEq)]
pub struct Cie<'a> {
    /// Offset of this entry in the section.
    pub offset: usize,
    pub version: u8,
    /// A null-terminated UTF-8 string that identifies the augmentation to this
    /// CIE or to the FDEs that use it.
    ///
    /// If there is no augmentation, this value is a zero byte.
    pub augmentation_string: &'a str,
    pub augmentation: Option<AugmentationData>,
    /// A constant that is factored out of all advance location instructions.
    /// The resulting value is (operand * code_alignment_factor).
    pub code_alignment_factor: u64,
    /// A constant that is factored out of certain offset instructions. The
    /// resulting value is (operand * data_alignment_factor).
    pub data_alignment_factor: i64,
    /// Which column in the rule table represents the return address of the
    /// function. Note that this column might not correspond to an actual
    /// machine register.
    pub return_address_register: u64,
    /// A sequence of rules that are interpreted to create the initial setting
    /// of each column in the table.
    pub initial_instructions: &'a [u8],
}

impl Cie<'_> {
    /// Encoding of the pointers in FDEs belonging to this CIE.
    pub fn pointer_encoding(&self) -> Encoding {
        self.augmentation
            .as_ref()
            .and_then(|aug| aug.pointer_encoding)
            .unwrap_or(Encoding::DW_EH_PE_absptr)
    }

    pub fn is_signal_frame(&self) -> bool {
        self.augmentation.as_ref().is_some_and(|aug| aug.signal_frame)
    }
}

/// Frame Description Entry
#[derive(Debug, PartialEq)]
pub struct Fde<'a> {
    /// Offset of this entry in the section.
    pub offset: usize,
    /// Offset of the CIE this FDE belongs to.
    pub cie_offset: usize,
    /// The address of the first instruction of the function.
    pub pc_begin: u64,
    /// The number of bytes of program instructions described by this entry.
    pub pc_range: u64,
    /// The language specific data area, if the CIE has an `L` augmentation.
    pub lsda: Option<u64>,
    /// A sequence of table defining instructions.
    pub instructions: &'a [u8],
}

impl Fde<'_> {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.pc_begin && addr - self.pc_begin < self.pc_range
    }
}

#[derive(Debug, PartialEq)]
pub struct AugmentationData {
    pub lsda_pointer_encoding: Option<Encoding>,
    pub pointer_encoding: Option<Encoding>,
    pub personality: Option<u64>,
    /// `S`: the frame is a signal trampoline.
    pub signal_frame: bool,
}

/// One entry of the section.
#[derive(Debug, PartialEq)]
pub enum FrameInfo<'a> {
    Cie(Cie<'a>),
    Fde(Fde<'a>),
}

struct FrameHead<'a> {
    /// The CIE id, or for an FDE the CIE pointer.
    id: u32,
    /// Offset of the id field in the section.
    id_offset: usize,
    body: Cursor<'a>,
    next_offset: usize,
}

impl FrameHead<'_> {
    /// The CIE an FDE entry at `offset` points to.
    fn cie_offset(&self, offset: usize) -> Result<usize> {
        self.id_offset
            .checked_sub(self.id as usize)
            .ok_or_else(|| Error(format!("FDE at {offset:#x} points before the section")))
    }
}

impl<'a> EhFrame<'a> {
    pub fn new(data: &'a [u8], address: u64) -> Self {
        Self {
            data,
            address,
            pointers: PointerContext::default(),
        }
    }

    fn cursor_at(&self, offset: usize) -> Result<Cursor<'a>> {
        let data = self
            .data
            .get(offset..)
            .ok_or_else(|| Error(format!("offset {offset:#x} is outside of .eh_frame")))?;
        Ok(Cursor::new(data, self.address.wrapping_add(offset as u64)))
    }

    /// `None` for the zero terminator or the end of the section.
    fn frame_head(&self, offset: usize) -> Result<Option<FrameHead<'a>>> {
        let mut data = self.cursor_at(offset)?;
        if data.is_empty() {
            return Ok(None);
        }
        let len = read_u32(&mut data)?;
        if len == 0 {
            return Ok(None);
        }
        if len == 0xffffffff {
            return Err(Error("64-bit DWARF entries are not supported".into()));
        }
        let mut body = data.split(len as usize)?;
        trace!("frame info entry (without len): {:x?}", body.data);

        let id_offset = offset + 4;
        let id = read_u32(&mut body)?;
        Ok(Some(FrameHead {
            id,
            id_offset,
            body,
            next_offset: id_offset + len as usize,
        }))
    }

    /// Parses the entry at `offset`, returning it and the offset of the next
    /// entry, or `None` at the end of the section.
    pub fn entry_at(&self, offset: usize) -> Result<Option<(FrameInfo<'a>, usize)>> {
        let Some(head) = self.frame_head(offset)? else {
            return Ok(None);
        };
        let next = head.next_offset;
        let entry = if head.id == 0 {
            FrameInfo::Cie(parse_cie(offset, head.body, &self.pointers)?)
        } else {
            let cie_offset = head.cie_offset(offset)?;
            let cie = self.cie_at(cie_offset)?;
            FrameInfo::Fde(parse_fde(offset, cie_offset, head.body, &cie, &self.pointers)?)
        };
        Ok(Some((entry, next)))
    }

    pub fn cie_at(&self, offset: usize) -> Result<Cie<'a>> {
        let head = self
            .frame_head(offset)?
            .ok_or_else(|| Error(format!("no CIE at {offset:#x}")))?;
        if head.id != 0 {
            return Err(Error("CIE must have cie_id=0".into()));
        }
        parse_cie(offset, head.body, &self.pointers)
    }

    /// The FDE at `offset` together with its CIE.
    pub fn fde_at(&self, offset: usize) -> Result<(Cie<'a>, Fde<'a>)> {
        match self.entry_at(offset)? {
            Some((FrameInfo::Fde(fde), _)) => {
                let cie = self.cie_at(fde.cie_offset)?;
                Ok((cie, fde))
            }
            Some((FrameInfo::Cie(_), _)) => {
                Err(Error(format!("no FDE at {offset:#x}, found a CIE")))
            }
            None => Err(Error(format!("no FDE at {offset:#x}"))),
        }
    }

    /// Walks the section looking for the FDE covering `addr`.
    ///
    /// CIEs are only parsed for the FDEs they belong to. FDEs whose CIE we
    /// can't parse are skipped, we can't even tell which addresses they cover.
    #[instrument(skip(self))]
    pub fn find_fde(&self, addr: u64) -> Result<Option<(Cie<'a>, Fde<'a>)>> {
        let mut offset = 0;
        while let Some(head) = self.frame_head(offset)? {
            let next = head.next_offset;
            if head.id != 0 {
                let cie_offset = head.cie_offset(offset)?;
                match self.cie_at(cie_offset) {
                    Ok(cie) => {
                        let fde = parse_fde(offset, cie_offset, head.body, &cie, &self.pointers)?;
                        if fde.contains(addr) {
                            debug!(offset = fde.offset, pc_begin = fde.pc_begin, "found FDE");
                            return Ok(Some((cie, fde)));
                        }
                    }
                    Err(err) => {
                        warn!(offset, cie_offset, %err, "skipping FDE with unsupported CIE")
                    }
                }
            }
            offset = next;
        }
        Ok(None)
    }
}

#[instrument(skip(data, ctx))]
fn parse_cie<'a>(offset: usize, mut data: Cursor<'a>, ctx: &PointerContext) -> Result<Cie<'a>> {
    let data = &mut data;
    let version = read_u8(data)?;
    if version != 1 && version != 3 {
        return Err(Error(format!("version must be 1 or 3: {version}")));
    }

    let augmentation = read_utf8_cstr(data)?;
    if !augmentation.is_empty() && !augmentation.starts_with('z') {
        return Err(Error(format!("unsupported augmentation: {augmentation:?}")));
    }
    let code_alignment_factor = read_uleb128(data)?;
    let data_alignment_factor = read_ileb128(data)?;
    let return_address_register = if version == 1 {
        u64::from(read_u8(data)?)
    } else {
        read_uleb128(data)?
    };

    let augmentation_data = if augmentation.starts_with('z') {
        let aug_len = read_uleb128(data)?;
        let aug_data = data.split(aug_len as usize)?;

        let aug = parse_augmentation_data(augmentation, aug_data, ctx)?;
        trace!("augmentation {aug:?}");

        Some(aug)
    } else {
        None
    };

    let cie = Cie {
        offset,
        version,
        augmentation_string: augmentation,
        augmentation: augmentation_data,
        code_alignment_factor,
        data_alignment_factor,
        return_address_register,
        initial_instructions: data.data,
    };

    trace!("{cie:?}");
    Ok(cie)
}

#[instrument(skip(data, cie, ctx))]
fn parse_fde<'a>(
    offset: usize,
    cie_offset: usize,
    mut data: Cursor<'a>,
    cie: &Cie<'_>,
    ctx: &PointerContext,
) -> Result<Fde<'a>> {
    let data = &mut data;
    let pointer_encoding = cie.pointer_encoding();

    let pc_begin = read_encoded(data, pointer_encoding, ctx)?;
    let pc_range = read_encoded(data, pointer_encoding.format_only(), ctx)?;

    let mut lsda = None;
    if let Some(augmentation) = &cie.augmentation {
        let augmentation_len = read_uleb128(data)?;
        let mut aug_data = data.split(augmentation_len as usize)?;
        if let Some(encoding) = augmentation.lsda_pointer_encoding {
            if !encoding.is_omit() {
                lsda = Some(read_encoded(&mut aug_data, encoding, ctx)?);
            }
        }
    }

    let fde = Fde {
        offset,
        cie_offset,
        pc_begin,
        pc_range,
        lsda,
        instructions: data.data,
    };
    trace!("{fde:?}");
    Ok(fde)
}

fn parse_augmentation_data(
    string: &str,
    mut data: Cursor<'_>,
    ctx: &PointerContext,
) -> Result<AugmentationData> {
    let data = &mut data;
    trace!("aug data {:?} | {:x?}", string, data.data);

    let mut aug_data = AugmentationData {
        pointer_encoding: None,
        lsda_pointer_encoding: None,
        personality: None,
        signal_frame: false,
    };

    // The leading `z` has been checked by the caller and only says that the
    // augmentation data has a length.
    for code in string.bytes().skip(1) {
        match code {
            // The CIE argument is the 1-byte pointer encoding of the LSDA
            // pointer in the FDE's augmentation data.
            b'L' => {
                let encoding = read_u8(data)?;
                aug_data.lsda_pointer_encoding = Some(Encoding(encoding));
            }
            // A 1-byte pointer encoding followed by the address of the
            // personality routine in that encoding.
            b'P' => {
                let encoding = Encoding(read_u8(data)?);
                let value = read_encoded(data, encoding, ctx)?;
                aug_data.personality = Some(value);
            }
            // The 1-byte pointer encoding of the addresses in the FDE.
            b'R' => {
                let encoding = read_u8(data)?;
                aug_data.pointer_encoding = Some(Encoding(encoding));
            }
            // No argument, the frame is a signal trampoline.
            b'S' => aug_data.signal_frame = true,
            // AArch64: return addresses are signed with the B key (`B`) or
            // the frame uses memory tagging (`G`). Neither changes the rules.
            b'B' | b'G' => {}
            _ => return Err(Error(format!("invalid augmentation code: {code}"))),
        }
    }

    Ok(aug_data)
}

/// A parsed call frame instruction.
///
/// Register numbers and operands are kept as they are encoded, factoring
/// and range checks happen when they are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    //-------- 6.4.2.1 Row Creation Instructions
    //
    /// Create a new row at the given target address.
    SetLoc(u64),
    /// Create a new row at `delta * code_alignment_factor` past the current
    /// one. The delta is encoded in the opcode.
    AdvanceLoc(u8),
    AdvanceLoc1(u8),
    AdvanceLoc2(u16),
    AdvanceLoc4(u32),
    //
    //-------- 6.4.2.2 CFA Definition Instructions
    //
    /// CFA = register + offset, with a non-factored offset.
    DefCfa { register: u64, offset: u64 },
    /// Like `DefCfa`, but the offset is signed and factored.
    DefCfaSf { register: u64, factored_offset: i64 },
    /// Use a new register but keep the old offset.
    DefCfaRegister(u64),
    /// Use a new (non-factored) offset but keep the old register.
    DefCfaOffset(u64),
    DefCfaOffsetSf(i64),
    DefCfaExpression(&'a [u8]),
    //
    //-------- 6.4.2.3 Register Rule Instructions
    //
    Undefined(u64),
    SameValue(u64),
    /// The register is saved at CFA + `factored_offset * data_alignment_factor`.
    /// The register is encoded in the opcode.
    Offset { register: u64, factored_offset: u64 },
    OffsetExtended { register: u64, factored_offset: u64 },
    OffsetExtendedSf { register: u64, factored_offset: i64 },
    /// The register's value is CFA + `factored_offset * data_alignment_factor`.
    ValOffset { register: u64, factored_offset: u64 },
    ValOffsetSf { register: u64, factored_offset: i64 },
    /// `target_register` is saved in `from_register`.
    Register { target_register: u64, from_register: u64 },
    /// The register is saved at the address computed by the expression.
    Expression { register: u64, expr: &'a [u8] },
    /// The register's value is computed by the expression.
    ValExpression { register: u64, expr: &'a [u8] },
    /// Change the register's rule back to the one from the CIE's initial
    /// instructions.
    Restore(u64),
    RestoreExtended(u64),
    //
    //-------- 6.4.2.4 Row State Instructions
    //
    /// Push the rules of all registers onto an implicit stack.
    RememberState,
    /// Pop rules off that stack into the current row.
    RestoreState,
    //
    //-------- GNU extensions
    //
    GnuArgsSize(u64),
    GnuNegativeOffsetExtended { register: u64, factored_offset: u64 },
    //
    //-------- 6.4.2.5 Padding Instruction
    //
    Nop,
}

/// Iterates over the instructions of a CIE or FDE.
pub struct InstrIter<'a> {
    data: Cursor<'a>,
    pointer_encoding: Encoding,
    ctx: PointerContext,
}

impl<'a> InstrIter<'a> {
    /// `addr` is the address `data` is loaded at and `pointer_encoding` is the
    /// encoding of `DW_CFA_set_loc` operands, the FDE pointer encoding of the
    /// CIE.
    pub fn new(data: &'a [u8], addr: u64, pointer_encoding: Encoding, ctx: PointerContext) -> Self {
        Self {
            data: Cursor::new(data, addr),
            pointer_encoding,
            ctx,
        }
    }

    fn uleb128(&mut self) -> Result<u64> {
        read_uleb128(&mut self.data)
    }

    fn ileb128(&mut self) -> Result<i64> {
        read_ileb128(&mut self.data)
    }

    fn block(&mut self) -> Result<&'a [u8]> {
        let len = self.uleb128()?;
        let len = usize::try_from(len).map_err(|_| Error(format!("block too long: {len}")))?;
        read_bytes(&mut self.data, len)
    }

    fn parse(&mut self, b: u8) -> Result<Instruction<'a>> {
        let low_6 = b & (u8::MAX >> 2);
        Ok(match b >> 6 {
            DW_CFA_advance_loc_hi => Instruction::AdvanceLoc(low_6),
            DW_CFA_offset_hi => Instruction::Offset {
                register: low_6.into(),
                factored_offset: self.uleb128()?,
            },
            DW_CFA_restore_hi => Instruction::Restore(low_6.into()),
            _ => match b {
                DW_CFA_nop => Instruction::Nop,
                DW_CFA_set_loc => {
                    let addr = read_encoded(&mut self.data, self.pointer_encoding, &self.ctx)?;
                    Instruction::SetLoc(addr)
                }
                DW_CFA_advance_loc1 => Instruction::AdvanceLoc1(read_u8(&mut self.data)?),
                DW_CFA_advance_loc2 => Instruction::AdvanceLoc2(read_u16(&mut self.data)?),
                DW_CFA_advance_loc4 => Instruction::AdvanceLoc4(read_u32(&mut self.data)?),
                DW_CFA_offset_extended => Instruction::OffsetExtended {
                    register: self.uleb128()?,
                    factored_offset: self.uleb128()?,
                },
                DW_CFA_restore_extended => Instruction::RestoreExtended(self.uleb128()?),
                DW_CFA_undefined => Instruction::Undefined(self.uleb128()?),
                DW_CFA_same_value => Instruction::SameValue(self.uleb128()?),
                DW_CFA_register => Instruction::Register {
                    target_register: self.uleb128()?,
                    from_register: self.uleb128()?,
                },
                DW_CFA_remember_state => Instruction::RememberState,
                DW_CFA_restore_state => Instruction::RestoreState,
                DW_CFA_def_cfa => Instruction::DefCfa {
                    register: self.uleb128()?,
                    offset: self.uleb128()?,
                },
                DW_CFA_def_cfa_register => Instruction::DefCfaRegister(self.uleb128()?),
                DW_CFA_def_cfa_offset => Instruction::DefCfaOffset(self.uleb128()?),
                DW_CFA_def_cfa_expression => Instruction::DefCfaExpression(self.block()?),
                DW_CFA_expression => Instruction::Expression {
                    register: self.uleb128()?,
                    expr: self.block()?,
                },
                DW_CFA_offset_extended_sf => Instruction::OffsetExtendedSf {
                    register: self.uleb128()?,
                    factored_offset: self.ileb128()?,
                },
                DW_CFA_def_cfa_sf => Instruction::DefCfaSf {
                    register: self.uleb128()?,
                    factored_offset: self.ileb128()?,
                },
                DW_CFA_def_cfa_offset_sf => Instruction::DefCfaOffsetSf(self.ileb128()?),
                DW_CFA_val_offset => Instruction::ValOffset {
                    register: self.uleb128()?,
                    factored_offset: self.uleb128()?,
                },
                DW_CFA_val_offset_sf => Instruction::ValOffsetSf {
                    register: self.uleb128()?,
                    factored_offset: self.ileb128()?,
                },
                DW_CFA_val_expression => Instruction::ValExpression {
                    register: self.uleb128()?,
                    expr: self.block()?,
                },
                DW_CFA_GNU_args_size => Instruction::GnuArgsSize(self.uleb128()?),
                DW_CFA_GNU_negative_offset_extended => Instruction::GnuNegativeOffsetExtended {
                    register: self.uleb128()?,
                    factored_offset: self.uleb128()?,
                },
                _ => return Err(Error(format!("unknown call frame instruction: {b:#x}"))),
            },
        })
    }
}

const DW_CFA_advance_loc_hi: u8 = 0x01;
const DW_CFA_offset_hi: u8 = 0x02;
const DW_CFA_restore_hi: u8 = 0x03;

const DW_CFA_nop: u8 = 0;
const DW_CFA_set_loc: u8 = 0x01;
const DW_CFA_advance_loc1: u8 = 0x02;
const DW_CFA_advance_loc2: u8 = 0x03;
const DW_CFA_advance_loc4: u8 = 0x04;
const DW_CFA_offset_extended: u8 = 0x05;
const DW_CFA_restore_extended: u8 = 0x06;
const DW_CFA_undefined: u8 = 0x07;
const DW_CFA_same_value: u8 = 0x08;
const DW_CFA_register: u8 = 0x09;
const DW_CFA_remember_state: u8 = 0x0a;
const DW_CFA_restore_state: u8 = 0x0b;
const DW_CFA_def_cfa: u8 = 0x0c;
const DW_CFA_def_cfa_register: u8 = 0x0d;
const DW_CFA_def_cfa_offset: u8 = 0x0e;
const DW_CFA_def_cfa_expression: u8 = 0x0f;
const DW_CFA_expression: u8 = 0x10;
const DW_CFA_offset_extended_sf: u8 = 0x11;
const DW_CFA_def_cfa_sf: u8 = 0x12;
const DW_CFA_def_cfa_offset_sf: u8 = 0x13;
const DW_CFA_val_offset: u8 = 0x14;
const DW_CFA_val_offset_sf: u8 = 0x15;
const DW_CFA_val_expression: u8 = 0x16;
const DW_CFA_GNU_args_size: u8 = 0x2e;
const DW_CFA_GNU_negative_offset_extended: u8 = 0x2f;

impl<'a> Iterator for InstrIter<'a> {
    type Item = Result<Instruction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let b = read_u8(&mut self.data).ok()?;
        let instr = self.parse(b);
        if instr.is_err() {
            // Nothing after a broken instruction can be trusted.
            self.data.data = &[];
        }
        Some(instr)
    }
}
