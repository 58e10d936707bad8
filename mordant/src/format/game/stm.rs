use std::{io::{Read, Seek, Write}, marker::PhantomData};
use binrw::{BinRead, BinWrite};
use half::f16;

pub const EXT: &'static [&'static str] = &["stm"];

/// Player selectable stain, 1 based; 0 means unstained.
pub type StainId = u8;

/// Logical value slots per column; stains 1..=254 index them 1:1.
pub const STAIN_COUNT: usize = 254;

const MAGIC: u16 = u16::from_le_bytes(*b"SM");
const VERSION_LEGACY: u16 = 1;
const VERSION_CURRENT: u16 = 2;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{0:?}")] Binrw(#[from] binrw::Error),
	#[error("bad staining template magic {0:#06x}")] Magic(u16),
	#[error("unknown staining template version {0}")] Version(u16),
	#[error("template file holds {colors} color and {scalars} scalar columns, caller expects {expected_colors} and {expected_scalars}")]
	FormatMismatch {colors: u8, scalars: u8, expected_colors: u8, expected_scalars: u8},
	#[error("template {template} has a malformed data offset")]
	Offset {template: u16},
	#[error("template {template} column {column} spans {len} bytes, more than a full value table")]
	TemplateTooLarge {template: u16, column: usize, len: usize},
	#[error("template {template} column {column} length {len} matches no known encoding")]
	Column {template: u16, column: usize, len: usize},
	#[error("template file {0:?} does not exist")] Missing(&'static str),
}

// ----------

/// A value a template column can hold: one half float or a triple of them.
pub trait ColumnValue: Copy + Default + PartialEq {
	const SIZE: usize;

	fn read(data: &[u8]) -> Self;
	fn write(&self, out: &mut Vec<u8>);
}

impl ColumnValue for f32 {
	const SIZE: usize = 2;

	fn read(data: &[u8]) -> Self {
		f16::from_le_bytes([data[0], data[1]]).to_f32()
	}

	fn write(&self, out: &mut Vec<u8>) {
		out.extend_from_slice(&f16::from_f32(*self).to_le_bytes());
	}
}

impl ColumnValue for glam::Vec3 {
	const SIZE: usize = 6;

	fn read(data: &[u8]) -> Self {
		glam::vec3(
			<f32 as ColumnValue>::read(&data[0..2]),
			<f32 as ColumnValue>::read(&data[2..4]),
			<f32 as ColumnValue>::read(&data[4..6]),
		)
	}

	fn write(&self, out: &mut Vec<u8>) {
		<f32 as ColumnValue>::write(&self.x, out);
		<f32 as ColumnValue>::write(&self.y, out);
		<f32 as ColumnValue>::write(&self.z, out);
	}
}

// ----------

/// One logical column of [STAIN_COUNT] slots in its compact storage form.
#[derive(Debug, Clone, PartialEq)]
pub enum Column<T> {
	/// Every slot holds the default value.
	Empty,
	/// Every slot shares a single value.
	One(T),
	/// One value per slot.
	Full(Box<[T; STAIN_COUNT]>),
	/// A palette plus one index byte per slot; index 0 and indices past the
	/// palette resolve to the default value.
	Indexed {values: Vec<T>, indices: Box<[u8; STAIN_COUNT]>},
}

impl<T: ColumnValue> Column<T> {
	pub fn get(&self, slot: usize) -> T {
		match self {
			Self::Empty => T::default(),
			Self::One(v) => *v,
			Self::Full(values) => values.get(slot).copied().unwrap_or_default(),
			Self::Indexed {values, indices} => {
				let Some(i) = indices.get(slot) else {return T::default()};
				match (*i as usize).checked_sub(1) {
					Some(i) => values.get(i).copied().unwrap_or_default(),
					None => T::default(),
				}
			}
		}
	}

	fn read(data: &[u8], template: u16, column: usize) -> Result<Self, Error> {
		let len = data.len();
		let full = STAIN_COUNT * T::SIZE;
		if len == 0 {
			return Ok(Self::Empty);
		}

		if len == T::SIZE {
			return Ok(Self::One(T::read(data)));
		}

		if len == full {
			let mut values = Box::new([T::default(); STAIN_COUNT]);
			for i in 0..STAIN_COUNT {
				values[i] = T::read(&data[i * T::SIZE..]);
			}
			return Ok(Self::Full(values));
		}

		if len > full {
			return Err(Error::TemplateTooLarge {template, column, len});
		}

		if len > STAIN_COUNT && (len - STAIN_COUNT) % T::SIZE == 0 {
			let count = (len - STAIN_COUNT) / T::SIZE;
			let mut values = Vec::with_capacity(count);
			for i in 0..count {
				values.push(T::read(&data[i * T::SIZE..]));
			}
			let mut indices = Box::new([0u8; STAIN_COUNT]);
			indices.copy_from_slice(&data[count * T::SIZE..]);
			return Ok(Self::Indexed {values, indices});
		}

		Err(Error::Column {template, column, len})
	}

	fn write(&self, out: &mut Vec<u8>) {
		match self {
			Self::Empty => {}
			Self::One(v) => v.write(out),
			Self::Full(values) => for v in values.iter() {v.write(out)},
			Self::Indexed {values, indices} => {
				for v in values {
					v.write(out);
				}
				out.extend_from_slice(&indices[..]);
			}
		}
	}

	/// Picks the smallest of the four encodings for these slot values.
	pub fn build(values: &[T; STAIN_COUNT]) -> Self {
		let first = values[0];
		if values.iter().all(|v| *v == first) {
			return if first == T::default() {Self::Empty} else {Self::One(first)};
		}

		let mut palette = Vec::new();
		let mut indices = Box::new([0u8; STAIN_COUNT]);
		for (i, v) in values.iter().enumerate() {
			if *v == T::default() {continue}
			let index = match palette.iter().position(|p| p == v) {
				Some(p) => p,
				None => {
					palette.push(*v);
					palette.len() - 1
				}
			};
			indices[i] = index as u8 + 1;
		}

		// a palette that is not actually smaller than the flat table buys
		// nothing, and one of 127 scalars would collide with the flat
		// encoding's byte length; store those flat
		if palette.len() >= u8::MAX as usize || palette.len() * T::SIZE + STAIN_COUNT >= STAIN_COUNT * T::SIZE {
			return Self::Full(Box::new(*values));
		}

		Self::Indexed {values: palette, indices}
	}
}

// ----------

/// A fully resolved set of override values for one (template, stain) pair.
/// The two implementors mirror the two table generations; the column layout
/// is fixed per implementor and validated against the file header at load.
pub trait Pack: Copy + Default + PartialEq + std::fmt::Debug {
	const COLORS: usize;
	const SCALARS: usize;
	const VERSION: u16;
	const PATH: &'static str;

	fn color(&self, column: usize) -> glam::Vec3;
	fn scalar(&self, column: usize) -> f32;
	fn from_columns(colors: &[glam::Vec3], scalars: &[f32]) -> Self;
}

/// Override values of the current generation: three colors and nine scalars.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DyePack {
	pub diffuse: glam::Vec3,
	pub specular: glam::Vec3,
	pub emissive: glam::Vec3,
	pub scalar3: f32,
	pub metalness: f32,
	pub roughness: f32,
	pub sheen_rate: f32,
	pub sheen_tint_rate: f32,
	pub sheen_aperture: f32,
	pub anisotropy: f32,
	pub sphere_map_index: f32,
	pub sphere_map_mask: f32,
}

impl Pack for DyePack {
	const COLORS: usize = 3;
	const SCALARS: usize = 9;
	const VERSION: u16 = VERSION_CURRENT;
	const PATH: &'static str = "chara/base_material/stainingtemplate_gud.stm";

	fn color(&self, column: usize) -> glam::Vec3 {
		[self.diffuse, self.specular, self.emissive][column]
	}

	fn scalar(&self, column: usize) -> f32 {
		[self.scalar3, self.metalness, self.roughness, self.sheen_rate, self.sheen_tint_rate,
			self.sheen_aperture, self.anisotropy, self.sphere_map_index, self.sphere_map_mask][column]
	}

	fn from_columns(colors: &[glam::Vec3], scalars: &[f32]) -> Self {
		Self {
			diffuse: colors[0],
			specular: colors[1],
			emissive: colors[2],
			scalar3: scalars[0],
			metalness: scalars[1],
			roughness: scalars[2],
			sheen_rate: scalars[3],
			sheen_tint_rate: scalars[4],
			sheen_aperture: scalars[5],
			anisotropy: scalars[6],
			sphere_map_index: scalars[7],
			sphere_map_mask: scalars[8],
		}
	}
}

/// Override values of the legacy generation: three colors and two scalars.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LegacyDyePack {
	pub diffuse: glam::Vec3,
	pub specular: glam::Vec3,
	pub emissive: glam::Vec3,
	pub shininess: f32,
	pub specular_mask: f32,
}

impl Pack for LegacyDyePack {
	const COLORS: usize = 3;
	const SCALARS: usize = 2;
	const VERSION: u16 = VERSION_LEGACY;
	const PATH: &'static str = "chara/base_material/stainingtemplate.stm";

	fn color(&self, column: usize) -> glam::Vec3 {
		[self.diffuse, self.specular, self.emissive][column]
	}

	fn scalar(&self, column: usize) -> f32 {
		[self.shininess, self.specular_mask][column]
	}

	fn from_columns(colors: &[glam::Vec3], scalars: &[f32]) -> Self {
		Self {
			diffuse: colors[0],
			specular: colors[1],
			emissive: colors[2],
			shininess: scalars[0],
			specular_mask: scalars[1],
		}
	}
}

// ----------

/// The column stores of one template id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entry {
	pub colors: Vec<Column<glam::Vec3>>,
	pub scalars: Vec<Column<f32>>,
}

impl Entry {
	/// Rebuilds the full override record for one stain. Stains outside
	/// 1..=254 yield the all default record.
	pub fn pack<P: Pack>(&self, stain: StainId) -> P {
		let Some(slot) = (stain as usize).checked_sub(1) else {return P::default()};
		if slot >= STAIN_COUNT {return P::default()}

		let colors = (0..P::COLORS)
			.map(|i| self.colors.get(i).map(|c| c.get(slot)).unwrap_or_default())
			.collect::<Vec<_>>();
		let scalars = (0..P::SCALARS)
			.map(|i| self.scalars.get(i).map(|c| c.get(slot)).unwrap_or_default())
			.collect::<Vec<_>>();
		P::from_columns(&colors, &scalars)
	}

	/// Builds an entry from one record per stain slot, choosing the compact
	/// encoding per column independently.
	pub fn from_packs<P: Pack>(packs: &[P; STAIN_COUNT]) -> Self {
		let mut colors = Vec::with_capacity(P::COLORS);
		for c in 0..P::COLORS {
			let mut column = [glam::Vec3::default(); STAIN_COUNT];
			for (i, pack) in packs.iter().enumerate() {
				column[i] = pack.color(c);
			}
			colors.push(Column::build(&column));
		}

		let mut scalars = Vec::with_capacity(P::SCALARS);
		for c in 0..P::SCALARS {
			let mut column = [0f32; STAIN_COUNT];
			for (i, pack) in packs.iter().enumerate() {
				column[i] = pack.scalar(c);
			}
			scalars.push(Column::build(&column));
		}

		Self {colors, scalars}
	}

	fn read(data: &[u8], template: u16, colors: usize, scalars: usize) -> Result<Self, Error> {
		let columns = colors + scalars;
		let header = columns * 2;
		if data.len() < header {
			return Err(Error::Offset {template});
		}

		// the header is one cumulative end position per column, the column
		// data follows
		let mut ends = Vec::with_capacity(columns);
		for i in 0..columns {
			ends.push(u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]) as usize);
		}

		let body = &data[header..];
		let mut colors_out = Vec::with_capacity(colors);
		let mut scalars_out = Vec::with_capacity(scalars);
		let mut prev = 0;
		for (i, end) in ends.into_iter().enumerate() {
			let Some(slice) = end.checked_sub(prev).and_then(|_| body.get(prev..end)) else {
				return Err(Error::Offset {template});
			};
			if i < colors {
				colors_out.push(Column::read(slice, template, i)?);
			} else {
				scalars_out.push(Column::read(slice, template, i)?);
			}
			prev = end;
		}

		Ok(Self {colors: colors_out, scalars: scalars_out})
	}

	fn write(&self, out: &mut Vec<u8>) {
		let mut body = Vec::new();
		let mut ends = Vec::with_capacity(self.colors.len() + self.scalars.len());
		for column in &self.colors {
			column.write(&mut body);
			ends.push(body.len() as u16);
		}
		for column in &self.scalars {
			column.write(&mut body);
			ends.push(body.len() as u16);
		}

		for end in ends {
			out.extend_from_slice(&end.to_le_bytes());
		}
		out.extend_from_slice(&body);
	}
}

// ----------

/// A staining template file: template id to per stain override values.
///
/// Loaded once by the host and shared read only across every material that
/// dyes through it; nothing here mutates after parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Stm<P: Pack> {
	entries: Vec<(u16, Entry)>,
	_pack: PhantomData<P>,
}

impl<P: Pack> Default for Stm<P> {
	fn default() -> Self {
		Self {entries: Vec::new(), _pack: PhantomData}
	}
}

impl<P: Pack> Stm<P> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn read<T>(reader: &mut T) -> Result<Self, Error> where
	T: Read + Seek {
		let endian = binrw::Endian::Little;
		let magic = u16::read_options(reader, endian, ())?;
		if magic != MAGIC {
			return Err(Error::Magic(magic));
		}

		let version = u16::read_options(reader, endian, ())?;
		let (count, colors, scalars) = match version {
			// v1 has no column fields, its shape is implied
			VERSION_LEGACY => (u32::read_options(reader, endian, ())? as usize, 3, 2),
			VERSION_CURRENT => {
				let count = u16::read_options(reader, endian, ())? as usize;
				let colors = u8::read_options(reader, endian, ())? as usize;
				let scalars = u8::read_options(reader, endian, ())? as usize;
				(count, colors, scalars)
			}
			_ => return Err(Error::Version(version)),
		};

		if colors != P::COLORS || scalars != P::SCALARS {
			return Err(Error::FormatMismatch {
				colors: colors as u8,
				scalars: scalars as u8,
				expected_colors: P::COLORS as u8,
				expected_scalars: P::SCALARS as u8,
			});
		}

		let mut keys = Vec::with_capacity(count);
		for _ in 0..count {
			keys.push(u16::read_options(reader, endian, ())?);
		}
		let mut offsets = Vec::with_capacity(count);
		for _ in 0..count {
			offsets.push(u32::read_options(reader, endian, ())? as usize);
		}
		let mut blob = Vec::new();
		reader.read_to_end(&mut blob).map_err(binrw::Error::Io)?;

		// an entry runs from its offset to the next entry's offset
		let mut entries = Vec::with_capacity(count);
		for i in 0..count {
			let start = offsets[i];
			let end = if i + 1 < count {offsets[i + 1]} else {blob.len()};
			let Some(data) = end.checked_sub(start).and_then(|_| blob.get(start..end)) else {
				return Err(Error::Offset {template: keys[i]});
			};
			entries.push((keys[i], Entry::read(data, keys[i], P::COLORS, P::SCALARS)?));
		}

		entries.sort_by_key(|(key, _)| *key);
		Ok(Self {entries, _pack: PhantomData})
	}

	pub fn write<T>(&self, writer: &mut T) -> Result<(), Error> where
	T: Write + Seek {
		let endian = binrw::Endian::Little;
		MAGIC.write_options(writer, endian, ())?;
		P::VERSION.write_options(writer, endian, ())?;
		match P::VERSION {
			VERSION_LEGACY => (self.entries.len() as u32).write_options(writer, endian, ())?,
			_ => {
				(self.entries.len() as u16).write_options(writer, endian, ())?;
				(P::COLORS as u8).write_options(writer, endian, ())?;
				(P::SCALARS as u8).write_options(writer, endian, ())?;
			}
		}

		for (key, _) in &self.entries {
			key.write_options(writer, endian, ())?;
		}

		let mut blob = Vec::new();
		for (_, entry) in &self.entries {
			(blob.len() as u32).write_options(writer, endian, ())?;
			entry.write(&mut blob);
		}
		writer.write_all(&blob).map_err(binrw::Error::Io)?;

		Ok(())
	}

	pub fn entry(&self, template: u16) -> Option<&Entry> {
		self.entries.binary_search_by_key(&template, |(key, _)| *key)
			.ok()
			.map(|i| &self.entries[i].1)
	}

	/// The override record for one (template, stain) pair; None only when the
	/// template id itself is unknown.
	pub fn get(&self, template: u16, stain: StainId) -> Option<P> {
		Some(self.entry(template)?.pack::<P>(stain))
	}

	pub fn set(&mut self, template: u16, packs: &[P; STAIN_COUNT]) {
		let entry = Entry::from_packs(packs);
		match self.entries.binary_search_by_key(&template, |(key, _)| *key) {
			Ok(i) => self.entries[i].1 = entry,
			Err(i) => self.entries.insert(i, (template, entry)),
		}
	}

	pub fn templates(&self) -> impl Iterator<Item = u16> + '_ {
		self.entries.iter().map(|(key, _)| *key)
	}

	pub fn load(resource: &impl crate::Resource) -> Result<Self, Error> {
		let data = resource.load(P::PATH).ok_or(Error::Missing(P::PATH))?;
		Self::read(&mut std::io::Cursor::new(&data))
	}
}

impl<P: Pack> crate::format::external::Bytes<Error> for Stm<P> {
	fn read<T>(reader: &mut T) -> Result<Self, Error> where
	T: Read + Seek {
		Stm::read(reader)
	}

	fn write<T>(&self, writer: &mut T) -> Result<(), Error> where
	T: Write + Seek {
		Stm::write(self, writer)
	}
}

// ----------
