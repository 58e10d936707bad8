use std::io::{Read, Seek, Write};
use binrw::{BinRead, BinWrite};
use super::color_table::Generation;

// packed rows keep their on disk byte order; every accessor reads and writes
// only its own bits
macro_rules! dye_flags {
	($row:ty, $($get:ident/$set:ident @ $bit:expr;)*) => {
		impl $row {
			$(
			pub fn $get(&self) -> bool {
				self.bits() >> $bit & 1 != 0
			}

			pub fn $set(&mut self, v: bool) {
				self.set_bits(self.bits() & !(1 << $bit) | (v as u32) << $bit);
			}
			)*
		}
	};
}

// ----------

/// One dye row of the current layout: a packed little endian u32 holding the
/// template id, the stain channel and twelve dyeable field flags.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ColorDyeRow(pub [u8; 4]);

impl ColorDyeRow {
	pub const SIZE: usize = 4;

	const TEMPLATE_SHIFT: u32 = 16;
	const TEMPLATE_MASK: u32 = 0x7FF;
	const CHANNEL_SHIFT: u32 = 27;
	const CHANNEL_MASK: u32 = 0x3;

	fn bits(&self) -> u32 {
		u32::from_le_bytes(self.0)
	}

	fn set_bits(&mut self, v: u32) {
		self.0 = v.to_le_bytes();
	}

	pub fn template(&self) -> u16 {
		(self.bits() >> Self::TEMPLATE_SHIFT & Self::TEMPLATE_MASK) as u16
	}

	pub fn set_template(&mut self, v: u16) {
		self.set_bits(self.bits() & !(Self::TEMPLATE_MASK << Self::TEMPLATE_SHIFT) | (v as u32 & Self::TEMPLATE_MASK) << Self::TEMPLATE_SHIFT);
	}

	pub fn channel(&self) -> u8 {
		(self.bits() >> Self::CHANNEL_SHIFT & Self::CHANNEL_MASK) as u8
	}

	pub fn set_channel(&mut self, v: u8) {
		self.set_bits(self.bits() & !(Self::CHANNEL_MASK << Self::CHANNEL_SHIFT) | (v as u32 & Self::CHANNEL_MASK) << Self::CHANNEL_SHIFT);
	}

	pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
		&self.0
	}
}

dye_flags!(ColorDyeRow,
	diffuse/set_diffuse @ 0;
	specular/set_specular @ 1;
	emissive/set_emissive @ 2;
	scalar3/set_scalar3 @ 3;
	metalness/set_metalness @ 4;
	roughness/set_roughness @ 5;
	sheen_rate/set_sheen_rate @ 6;
	sheen_tint_rate/set_sheen_tint_rate @ 7;
	sheen_aperture/set_sheen_aperture @ 8;
	anisotropy/set_anisotropy @ 9;
	sphere_map_index/set_sphere_map_index @ 10;
	sphere_map_mask/set_sphere_map_mask @ 11;
);

/// One dye row of the legacy layout: a packed little endian u16 with the
/// template id and five dyeable field flags. Legacy rows carry no channel.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LegacyColorDyeRow(pub [u8; 2]);

impl LegacyColorDyeRow {
	pub const SIZE: usize = 2;

	const TEMPLATE_SHIFT: u32 = 5;
	const TEMPLATE_MASK: u32 = 0x7FF;

	fn bits(&self) -> u32 {
		u16::from_le_bytes(self.0) as u32
	}

	fn set_bits(&mut self, v: u32) {
		self.0 = (v as u16).to_le_bytes();
	}

	pub fn template(&self) -> u16 {
		(self.bits() >> Self::TEMPLATE_SHIFT & Self::TEMPLATE_MASK) as u16
	}

	pub fn set_template(&mut self, v: u16) {
		self.set_bits(self.bits() & !(Self::TEMPLATE_MASK << Self::TEMPLATE_SHIFT) | (v as u32 & Self::TEMPLATE_MASK) << Self::TEMPLATE_SHIFT);
	}

	pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
		&self.0
	}
}

dye_flags!(LegacyColorDyeRow,
	diffuse/set_diffuse @ 0;
	specular/set_specular @ 1;
	emissive/set_emissive @ 2;
	shininess/set_shininess @ 3;
	specular_mask/set_specular_mask @ 4;
);

// ----------

/// The current dye table, one row per color table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentColorDyeTable {
	rows: [ColorDyeRow; 32],
}

/// The legacy dye table, one row per color table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyColorDyeTable {
	rows: [LegacyColorDyeRow; 16],
}

macro_rules! dye_table_impl {
	($table:ty, $row:ty, $rows:expr) => {
		impl $table {
			pub const ROWS: usize = $rows;
			pub const SIZE: usize = $rows * <$row>::SIZE;

			pub fn row(&self, i: usize) -> &$row {
				&self.rows[i]
			}

			pub fn row_mut(&mut self, i: usize) -> &mut $row {
				&mut self.rows[i]
			}

			pub fn rows(&self) -> &[$row] {
				&self.rows
			}

			pub fn rows_mut(&mut self) -> &mut [$row] {
				&mut self.rows
			}

			pub fn as_bytes(&self) -> &[u8] {
				bytemuck::cast_slice(&self.rows)
			}

			pub fn as_bytes_mut(&mut self) -> &mut [u8] {
				bytemuck::cast_slice_mut(&mut self.rows)
			}

			/// None if `data` holds fewer bytes than a full table.
			pub fn from_bytes(data: &[u8]) -> Option<Self> {
				let data = data.get(..Self::SIZE)?;
				let mut table = Self::default();
				table.as_bytes_mut().copy_from_slice(data);
				Some(table)
			}

			pub fn set_default_row(&mut self, i: usize) -> bool {
				let default = <$row>::default();
				let changed = self.rows[i] != default;
				self.rows[i] = default;
				changed
			}

			pub fn set_default(&mut self) -> bool {
				let mut changed = false;
				for i in 0..Self::ROWS {
					changed |= self.set_default_row(i);
				}
				changed
			}
		}

		impl Default for $table {
			fn default() -> Self {
				Self {rows: [<$row>::default(); $rows]}
			}
		}

		impl BinRead for $table {
			type Args<'a> = ();

			fn read_options<R: Read + Seek>(reader: &mut R, _endian: binrw::Endian, _args: Self::Args<'_>,) -> binrw::BinResult<Self> {
				let mut data = [0u8; Self::SIZE];
				reader.read_exact(&mut data)?;
				let mut table = Self::default();
				table.as_bytes_mut().copy_from_slice(&data);
				Ok(table)
			}
		}

		impl BinWrite for $table {
			type Args<'a> = ();

			fn write_options<W: Write + Seek>(&self, writer: &mut W, _endian: binrw::Endian, _args: Self::Args<'_>,) -> binrw::BinResult<()> {
				writer.write_all(self.as_bytes())?;
				Ok(())
			}
		}
	};
}

dye_table_impl!(CurrentColorDyeTable, ColorDyeRow, 32);
dye_table_impl!(LegacyColorDyeTable, LegacyColorDyeRow, 16);

impl CurrentColorDyeTable {
	/// Template and the shared flags carry over; scalar3 takes the legacy
	/// shininess flag and metalness the legacy specular mask flag, their
	/// closest equivalents. The channel defaults to 0.
	pub fn from_legacy(other: &LegacyColorDyeTable) -> Self {
		let mut table = Self::default();
		for i in 0..LegacyColorDyeTable::ROWS {
			let old = other.row(i);
			let row = table.row_mut(i);
			row.set_template(old.template());
			row.set_diffuse(old.diffuse());
			row.set_specular(old.specular());
			row.set_emissive(old.emissive());
			row.set_scalar3(old.shininess());
			row.set_metalness(old.specular_mask());
		}
		table
	}
}

impl LegacyColorDyeTable {
	/// Inverse of [CurrentColorDyeTable::from_legacy]; flags with no legacy
	/// counterpart and the channel are dropped.
	pub fn from_current(other: &CurrentColorDyeTable) -> Self {
		let mut table = Self::default();
		for i in 0..Self::ROWS {
			let new = other.row(i);
			let row = table.row_mut(i);
			row.set_template(new.template());
			row.set_diffuse(new.diffuse());
			row.set_specular(new.specular());
			row.set_emissive(new.emissive());
			row.set_shininess(new.scalar3());
			row.set_specular_mask(new.metalness());
		}
		table
	}
}

// ----------

/// A dye table of either layout.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorDyeTable {
	Current(CurrentColorDyeTable),
	Legacy(LegacyColorDyeTable),
}

impl ColorDyeTable {
	pub fn generation(&self) -> Generation {
		match self {
			Self::Current(_) => Generation::Current,
			Self::Legacy(_) => Generation::Legacy,
		}
	}

	pub fn as_bytes(&self) -> &[u8] {
		match self {
			Self::Current(v) => v.as_bytes(),
			Self::Legacy(v) => v.as_bytes(),
		}
	}

	pub fn convert(&self, to: Generation) -> ColorDyeTable {
		match (self, to) {
			(Self::Current(v), Generation::Current) => Self::Current(v.clone()),
			(Self::Current(v), Generation::Legacy) => Self::Legacy(LegacyColorDyeTable::from_current(v)),
			(Self::Legacy(v), Generation::Current) => Self::Current(CurrentColorDyeTable::from_legacy(v)),
			(Self::Legacy(v), Generation::Legacy) => Self::Legacy(v.clone()),
		}
	}
}

// ----------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bits_stay_isolated() {
		let mut row = ColorDyeRow::default();
		row.set_template(0x7FF);
		row.set_channel(3);
		row.set_diffuse(true);
		row.set_sphere_map_mask(true);

		assert_eq!(row.template(), 0x7FF);
		assert_eq!(row.channel(), 3);
		assert!(row.diffuse());
		assert!(row.sphere_map_mask());
		assert!(!row.specular());

		row.set_template(12);
		assert_eq!(row.template(), 12);
		assert_eq!(row.channel(), 3);
		assert!(row.diffuse());
		assert!(row.sphere_map_mask());

		row.set_diffuse(false);
		assert!(!row.diffuse());
		assert!(row.sphere_map_mask());
		assert_eq!(row.template(), 12);
	}

	#[test]
	fn template_is_eleven_bits() {
		let mut row = LegacyColorDyeRow::default();
		row.set_specular_mask(true);
		row.set_template(0xFFFF);
		assert_eq!(row.template(), 0x7FF);
		assert!(row.specular_mask());
		assert_eq!(u16::from_le_bytes(row.0) & 0x1F, 0x10);
	}

	#[test]
	fn conversion_maps_semantic_pairs() {
		let mut legacy = LegacyColorDyeTable::default();
		{
			let row = legacy.row_mut(4);
			row.set_template(101);
			row.set_diffuse(true);
			row.set_shininess(true);
			row.set_specular_mask(true);
		}

		let current = CurrentColorDyeTable::from_legacy(&legacy);
		let row = current.row(4);
		assert_eq!(row.template(), 101);
		assert_eq!(row.channel(), 0);
		assert!(row.diffuse());
		assert!(row.scalar3());
		assert!(row.metalness());
		assert!(!row.roughness());

		let back = LegacyColorDyeTable::from_current(&current);
		assert_eq!(back.as_bytes(), legacy.as_bytes());
	}

	#[test]
	fn conversion_drops_extended_flags() {
		let mut current = CurrentColorDyeTable::default();
		{
			let row = current.row_mut(0);
			row.set_template(5);
			row.set_channel(2);
			row.set_roughness(true);
			row.set_anisotropy(true);
			row.set_emissive(true);
		}

		let legacy = LegacyColorDyeTable::from_current(&current);
		let row = legacy.row(0);
		assert_eq!(row.template(), 5);
		assert!(row.emissive());
		assert!(!row.shininess());
		assert!(!row.specular_mask());
	}

	#[test]
	fn table_bytes_roundtrip() {
		use binrw::{BinRead, BinWrite};

		let mut table = CurrentColorDyeTable::default();
		table.row_mut(12).set_template(12);
		table.row_mut(12).set_diffuse(true);

		let mut buf = std::io::Cursor::new(Vec::new());
		table.write_le(&mut buf).unwrap();
		assert_eq!(buf.get_ref().len(), CurrentColorDyeTable::SIZE);
		buf.set_position(0);
		let reread = CurrentColorDyeTable::read_le(&mut buf).unwrap();
		assert_eq!(reread, table);
	}

	#[test]
	fn enum_conversion() {
		let mut legacy = LegacyColorDyeTable::default();
		legacy.row_mut(0).set_template(7);
		let table = ColorDyeTable::Legacy(legacy);
		assert_eq!(table.generation(), Generation::Legacy);
		let current = table.convert(Generation::Current);
		assert_eq!(current.generation(), Generation::Current);
		match current {
			ColorDyeTable::Current(t) => assert_eq!(t.row(0).template(), 7),
			_ => unreachable!(),
		}
	}
}
