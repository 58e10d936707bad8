use std::io::{Read, Seek, Write};
use binrw::{BinRead, BinWrite};
use half::f16;
use super::dye_table::{ColorDyeRow, CurrentColorDyeTable, LegacyColorDyeRow, LegacyColorDyeTable};
use crate::format::game::stm::{DyePack, LegacyDyePack, StainId, Stm};

/// The two understood table layouts. Anything else is kept [Opaque](ColorTable::Opaque).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
	Current,
	Legacy,
}

/// Returned by row level operations on an opaque table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("opaque color tables do not support row level access")]
pub struct NotSupported;

// ----------

// rows are raw little endian bytes with accessors over fixed half positions;
// channels without a confirmed meaning have no accessor and survive edits
// untouched
macro_rules! row_accessors {
	($row:ty, $($kind:tt $get:ident/$set:ident @ $idx:expr;)*) => {
		impl $row {
			$(row_accessors!(@field $kind $get $set $idx);)*
		}
	};

	(@field vec3 $get:ident $set:ident $idx:expr) => {
		pub fn $get(&self) -> glam::Vec3 {
			glam::vec3(self.half($idx), self.half($idx + 1), self.half($idx + 2))
		}

		pub fn $set(&mut self, v: glam::Vec3) -> bool {
			self.set_half($idx, v.x) | self.set_half($idx + 1, v.y) | self.set_half($idx + 2, v.z)
		}
	};

	(@field scalar $get:ident $set:ident $idx:expr) => {
		pub fn $get(&self) -> f32 {
			self.half($idx)
		}

		pub fn $set(&mut self, v: f32) -> bool {
			self.set_half($idx, v)
		}
	};

	(@field raw $get:ident $set:ident $idx:expr) => {
		pub fn $get(&self) -> u16 {
			u16::from_le_bytes([self.0[$idx * 2], self.0[$idx * 2 + 1]])
		}

		pub fn $set(&mut self, v: u16) -> bool {
			let new = v.to_le_bytes();
			let changed = self.0[$idx * 2..$idx * 2 + 2] != new;
			self.0[$idx * 2..$idx * 2 + 2].copy_from_slice(&new);
			changed
		}
	};

	// tile indices are stored as index/64, biased by half a step so the trip
	// through f16 floors back to the same index
	(@field tile $get:ident $set:ident $idx:expr) => {
		pub fn $get(&self) -> u16 {
			(self.half($idx) * 64.0) as u16
		}

		pub fn $set(&mut self, v: u16) -> bool {
			self.set_half($idx, (v as f32 + 0.5) / 64.0)
		}
	};

	(@field mat2 $get:ident $set:ident $idx:expr) => {
		pub fn $get(&self) -> glam::Mat2 {
			glam::Mat2::from_cols_array(&[self.half($idx), self.half($idx + 1), self.half($idx + 2), self.half($idx + 3)])
		}

		pub fn $set(&mut self, v: glam::Mat2) -> bool {
			let a = v.to_cols_array();
			self.set_half($idx, a[0]) | self.set_half($idx + 1, a[1]) | self.set_half($idx + 2, a[2]) | self.set_half($idx + 3, a[3])
		}
	};
}

// ----------

/// One shading row of the current table layout, 32 half float channels.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ColorRow(pub [u8; 64]);

impl ColorRow {
	pub const SIZE: usize = 64;

	fn half(&self, i: usize) -> f32 {
		f16::from_le_bytes([self.0[i * 2], self.0[i * 2 + 1]]).to_f32()
	}

	fn set_half(&mut self, i: usize, v: f32) -> bool {
		let new = f16::from_f32(v).to_le_bytes();
		let changed = self.0[i * 2..i * 2 + 2] != new;
		self.0[i * 2..i * 2 + 2].copy_from_slice(&new);
		changed
	}

	pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
		&self.0
	}
}

row_accessors!(ColorRow,
	vec3 diffuse/set_diffuse @ 0;
	scalar scalar3/set_scalar3 @ 3;
	vec3 specular/set_specular @ 4;
	vec3 emissive/set_emissive @ 8;
	scalar sheen_rate/set_sheen_rate @ 12;
	scalar sheen_tint_rate/set_sheen_tint_rate @ 13;
	scalar sheen_aperture/set_sheen_aperture @ 14;
	scalar roughness/set_roughness @ 16;
	scalar metalness/set_metalness @ 18;
	scalar anisotropy/set_anisotropy @ 19;
	scalar sphere_map_mask/set_sphere_map_mask @ 21;
	raw shader_id/set_shader_id @ 24;
	tile tile_index/set_tile_index @ 25;
	scalar tile_alpha/set_tile_alpha @ 26;
	raw sphere_map_index/set_sphere_map_index @ 27;
	mat2 tile_transform/set_tile_transform @ 28;
);

impl Default for ColorRow {
	fn default() -> Self {
		let mut row = Self([0; Self::SIZE]);
		row.set_diffuse(glam::Vec3::ONE);
		row.set_scalar3(1.0);
		row.set_specular(glam::Vec3::ONE);
		row.set_half(11, 1.0);
		row.set_sheen_rate(0.1);
		row.set_sheen_tint_rate(0.2);
		row.set_sheen_aperture(5.0);
		row.set_tile_alpha(1.0);
		row.set_tile_transform(glam::Mat2::IDENTITY * 16.0);
		row
	}
}

/// One shading row of the legacy table layout, 16 half float channels.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LegacyColorRow(pub [u8; 32]);

impl LegacyColorRow {
	pub const SIZE: usize = 32;

	fn half(&self, i: usize) -> f32 {
		f16::from_le_bytes([self.0[i * 2], self.0[i * 2 + 1]]).to_f32()
	}

	fn set_half(&mut self, i: usize, v: f32) -> bool {
		let new = f16::from_f32(v).to_le_bytes();
		let changed = self.0[i * 2..i * 2 + 2] != new;
		self.0[i * 2..i * 2 + 2].copy_from_slice(&new);
		changed
	}

	pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
		&self.0
	}
}

row_accessors!(LegacyColorRow,
	vec3 diffuse/set_diffuse @ 0;
	scalar specular_mask/set_specular_mask @ 3;
	vec3 specular/set_specular @ 4;
	scalar shininess/set_shininess @ 7;
	vec3 emissive/set_emissive @ 8;
	tile tile_index/set_tile_index @ 11;
	mat2 tile_transform/set_tile_transform @ 12;
);

impl Default for LegacyColorRow {
	fn default() -> Self {
		let mut row = Self([0; Self::SIZE]);
		row.set_diffuse(glam::Vec3::ONE);
		row.set_specular_mask(1.0);
		row.set_specular(glam::Vec3::ONE);
		row.set_shininess(20.0);
		row.set_tile_transform(glam::Mat2::IDENTITY * 16.0);
		row
	}
}

// ----------

/// The current color table, exactly 32 rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentColorTable {
	rows: [ColorRow; 32],
}

/// The legacy color table, exactly 16 rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyColorTable {
	rows: [LegacyColorRow; 16],
}

macro_rules! table_impl {
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

			/// Resets row `i` to the baseline row, reporting whether any byte
			/// actually changed.
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

table_impl!(CurrentColorTable, ColorRow, 32);
table_impl!(LegacyColorTable, LegacyColorRow, 16);

impl CurrentColorTable {
	/// The legacy rows land 1:1 on their equivalent fields, rows 16..32 and
	/// fields the legacy layout never had stay at the baseline.
	pub fn from_legacy(other: &LegacyColorTable) -> Self {
		let mut table = Self::default();
		for i in 0..LegacyColorTable::ROWS {
			let old = other.row(i);
			let row = table.row_mut(i);
			row.set_diffuse(old.diffuse());
			row.set_specular(old.specular());
			row.set_emissive(old.emissive());
			row.set_scalar3(old.shininess());
			row.set_metalness(old.specular_mask());
			row.set_tile_index(old.tile_index());
			row.set_tile_transform(old.tile_transform());
		}
		table
	}

	/// Merges the stain overrides selected by `stains` into row `r` through
	/// its dye row. Only fields that actually differ are written.
	pub fn apply_dye_row(&mut self, dye: ColorDyeRow, stains: &[StainId], stm: &Stm<DyePack>, r: usize) -> bool {
		let stain = stains.get(dye.channel() as usize).copied().unwrap_or(0);
		if stain == 0 {return false}
		let Some(pack) = stm.get(dye.template(), stain) else {return false};

		let row = &mut self.rows[r];
		let mut changed = false;
		if dye.diffuse() {changed |= row.set_diffuse(pack.diffuse)}
		if dye.specular() {changed |= row.set_specular(pack.specular)}
		if dye.emissive() {changed |= row.set_emissive(pack.emissive)}
		if dye.scalar3() {changed |= row.set_scalar3(pack.scalar3)}
		if dye.metalness() {changed |= row.set_metalness(pack.metalness)}
		if dye.roughness() {changed |= row.set_roughness(pack.roughness)}
		if dye.sheen_rate() {changed |= row.set_sheen_rate(pack.sheen_rate)}
		if dye.sheen_tint_rate() {changed |= row.set_sheen_tint_rate(pack.sheen_tint_rate)}
		if dye.sheen_aperture() {changed |= row.set_sheen_aperture(pack.sheen_aperture)}
		if dye.anisotropy() {changed |= row.set_anisotropy(pack.anisotropy)}
		if dye.sphere_map_index() {changed |= row.set_sphere_map_index(pack.sphere_map_index as u16)}
		if dye.sphere_map_mask() {changed |= row.set_sphere_map_mask(pack.sphere_map_mask)}
		changed
	}

	pub fn apply_dye(&mut self, dyes: &CurrentColorDyeTable, stains: &[StainId], stm: &Stm<DyePack>) -> bool {
		let mut changed = false;
		for r in 0..Self::ROWS {
			changed |= self.apply_dye_row(*dyes.row(r), stains, stm, r);
		}
		changed
	}
}

impl LegacyColorTable {
	/// Truncates to the legacy 16 rows; fields the legacy layout has no slot
	/// for are dropped.
	pub fn from_current(other: &CurrentColorTable) -> Self {
		let mut table = Self::default();
		for i in 0..Self::ROWS {
			let new = other.row(i);
			let row = table.row_mut(i);
			row.set_diffuse(new.diffuse());
			row.set_specular(new.specular());
			row.set_emissive(new.emissive());
			row.set_shininess(new.scalar3());
			row.set_specular_mask(new.metalness());
			row.set_tile_index(new.tile_index());
			row.set_tile_transform(new.tile_transform());
		}
		table
	}

	pub fn apply_dye_row(&mut self, dye: LegacyColorDyeRow, stains: &[StainId], stm: &Stm<LegacyDyePack>, r: usize) -> bool {
		// legacy dye rows have no channel selector, they always use slot 0
		let stain = stains.first().copied().unwrap_or(0);
		if stain == 0 {return false}
		let Some(pack) = stm.get(dye.template(), stain) else {return false};

		let row = &mut self.rows[r];
		let mut changed = false;
		if dye.diffuse() {changed |= row.set_diffuse(pack.diffuse)}
		if dye.specular() {changed |= row.set_specular(pack.specular)}
		if dye.emissive() {changed |= row.set_emissive(pack.emissive)}
		if dye.shininess() {changed |= row.set_shininess(pack.shininess)}
		if dye.specular_mask() {changed |= row.set_specular_mask(pack.specular_mask)}
		changed
	}

	pub fn apply_dye(&mut self, dyes: &LegacyColorDyeTable, stains: &[StainId], stm: &Stm<LegacyDyePack>) -> bool {
		let mut changed = false;
		for r in 0..Self::ROWS {
			changed |= self.apply_dye_row(*dyes.row(r), stains, stm, r);
		}
		changed
	}
}

// ----------

/// A table of unrecognized dimensions, preserved byte for byte. The declared
/// log2 dimensions come from the material's additional data; row level
/// semantics are not claimed and mutation is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueColorTable {
	pub width_log: u8,
	pub height_log: u8,
	pub data: Vec<u8>,
}

impl OpaqueColorTable {
	pub fn width(&self) -> usize {
		1 << self.width_log
	}

	pub fn height(&self) -> usize {
		1 << self.height_log
	}

	/// Raw half bits at (x, y); no interpretation is attempted.
	pub fn value(&self, x: usize, y: usize) -> Option<u16> {
		if x >= self.width() || y >= self.height() {return None}
		let i = (y * self.width() + x) * 2;
		Some(u16::from_le_bytes([*self.data.get(i)?, *self.data.get(i + 1)?]))
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.data
	}
}

// ----------

/// A color table of either layout. The set is closed: current, legacy, or an
/// opaque byte preserving fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorTable {
	Current(CurrentColorTable),
	Legacy(LegacyColorTable),
	Opaque(OpaqueColorTable),
}

impl ColorTable {
	pub fn generation(&self) -> Option<Generation> {
		match self {
			Self::Current(_) => Some(Generation::Current),
			Self::Legacy(_) => Some(Generation::Legacy),
			Self::Opaque(_) => None,
		}
	}

	pub fn as_bytes(&self) -> &[u8] {
		match self {
			Self::Current(v) => v.as_bytes(),
			Self::Legacy(v) => v.as_bytes(),
			Self::Opaque(v) => v.as_bytes(),
		}
	}

	pub fn set_default_row(&mut self, i: usize) -> Result<bool, NotSupported> {
		match self {
			Self::Current(v) => Ok(v.set_default_row(i)),
			Self::Legacy(v) => Ok(v.set_default_row(i)),
			Self::Opaque(_) => Err(NotSupported),
		}
	}

	pub fn set_default(&mut self) -> Result<bool, NotSupported> {
		match self {
			Self::Current(v) => Ok(v.set_default()),
			Self::Legacy(v) => Ok(v.set_default()),
			Self::Opaque(_) => Err(NotSupported),
		}
	}

	/// Explicit conversion between the two understood layouts; opaque tables
	/// cannot be converted without claiming semantics they do not have.
	pub fn convert(&self, to: Generation) -> Result<ColorTable, NotSupported> {
		match (self, to) {
			(Self::Current(v), Generation::Current) => Ok(Self::Current(v.clone())),
			(Self::Current(v), Generation::Legacy) => Ok(Self::Legacy(LegacyColorTable::from_current(v))),
			(Self::Legacy(v), Generation::Current) => Ok(Self::Current(CurrentColorTable::from_legacy(v))),
			(Self::Legacy(v), Generation::Legacy) => Ok(Self::Legacy(v.clone())),
			(Self::Opaque(_), _) => Err(NotSupported),
		}
	}
}

// ----------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn baseline_row() {
		let row = ColorRow::default();
		assert_eq!(row.diffuse(), glam::Vec3::ONE);
		assert_eq!(row.specular(), glam::Vec3::ONE);
		assert_eq!(row.emissive(), glam::Vec3::ZERO);
		assert_eq!(row.scalar3(), 1.0);
		assert_eq!(row.sheen_aperture(), 5.0);
		assert_eq!(row.tile_alpha(), 1.0);
		assert_eq!(row.tile_transform(), glam::Mat2::IDENTITY * 16.0);
		assert_eq!(row.shader_id(), 0);
		assert_eq!(row.sphere_map_index(), 0);
	}

	#[test]
	fn accessors_roundtrip() {
		let mut row = ColorRow::default();
		assert!(row.set_diffuse(glam::vec3(0.5, 0.25, 0.75)));
		assert!(row.set_roughness(0.5));
		assert!(row.set_shader_id(37));
		assert_eq!(row.diffuse(), glam::vec3(0.5, 0.25, 0.75));
		assert_eq!(row.roughness(), 0.5);
		assert_eq!(row.shader_id(), 37);

		// writing the same value back is not a change
		assert!(!row.set_roughness(0.5));
		assert!(!row.set_shader_id(37));
	}

	#[test]
	fn tile_index_roundtrip() {
		let mut row = ColorRow::default();
		for i in 0..64 {
			row.set_tile_index(i);
			assert_eq!(row.tile_index(), i);
		}
	}

	#[test]
	fn set_default_row_reports_change() {
		let mut table = CurrentColorTable::default();
		assert!(!table.set_default_row(3));
		table.row_mut(3).set_emissive(glam::Vec3::ONE);
		assert!(table.set_default_row(3));
		assert!(!table.set_default());
	}

	#[test]
	fn table_bytes_roundtrip() {
		use binrw::{BinRead, BinWrite};

		let mut table = LegacyColorTable::default();
		table.row_mut(7).set_diffuse(glam::vec3(0.125, 1.0, 0.0));
		table.row_mut(15).set_shininess(32.0);

		let mut buf = std::io::Cursor::new(Vec::new());
		table.write_le(&mut buf).unwrap();
		assert_eq!(buf.get_ref().len(), LegacyColorTable::SIZE);
		buf.set_position(0);
		let reread = LegacyColorTable::read_le(&mut buf).unwrap();
		assert_eq!(reread.as_bytes(), table.as_bytes());
	}

	#[test]
	fn generation_conversion_preserves_legacy_fields() {
		let mut legacy = LegacyColorTable::default();
		for i in 0..LegacyColorTable::ROWS {
			let row = legacy.row_mut(i);
			row.set_diffuse(glam::vec3(0.25 * (i % 4) as f32, 0.5, 1.0));
			row.set_specular(glam::vec3(1.0, 0.5, 0.25));
			row.set_emissive(glam::vec3(0.0, 0.125, 0.0));
			row.set_shininess(i as f32 + 1.0);
			row.set_specular_mask(0.5);
			row.set_tile_index(i as u16 * 3);
			row.set_tile_transform(glam::Mat2::IDENTITY * 8.0);
		}

		let current = CurrentColorTable::from_legacy(&legacy);
		let back = LegacyColorTable::from_current(&current);
		assert_eq!(back.as_bytes(), legacy.as_bytes());

		// fields the legacy layout never had stay at the baseline
		let baseline = ColorRow::default();
		assert_eq!(current.row(0).sheen_rate(), baseline.sheen_rate());
		assert_eq!(current.row(0).tile_alpha(), baseline.tile_alpha());
		for i in LegacyColorTable::ROWS..CurrentColorTable::ROWS {
			assert_eq!(current.row(i), &baseline);
		}
	}

	#[test]
	fn opaque_refuses_row_access() {
		let mut table = ColorTable::Opaque(OpaqueColorTable {width_log: 2, height_log: 1, data: vec![0; 16]});
		assert_eq!(table.set_default_row(0), Err(NotSupported));
		assert_eq!(table.set_default(), Err(NotSupported));
		assert_eq!(table.convert(Generation::Current), Err(NotSupported));
		assert_eq!(table.generation(), None);
	}

	#[test]
	fn opaque_indexing() {
		let table = OpaqueColorTable {width_log: 1, height_log: 1, data: vec![1, 0, 2, 0, 3, 0, 4, 0]};
		assert_eq!(table.value(0, 0), Some(1));
		assert_eq!(table.value(1, 1), Some(4));
		assert_eq!(table.value(2, 0), None);
	}

	#[test]
	fn convert_roundtrip_through_enum() {
		let mut legacy = LegacyColorTable::default();
		legacy.row_mut(0).set_emissive(glam::Vec3::ONE);
		let table = ColorTable::Legacy(legacy.clone());
		let current = table.convert(Generation::Current).unwrap();
		assert_eq!(current.generation(), Some(Generation::Current));
		let back = current.convert(Generation::Legacy).unwrap();
		assert_eq!(back.as_bytes(), table.as_bytes());
	}
}
