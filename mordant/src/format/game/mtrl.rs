use std::{collections::HashMap, io::{Read, Seek, SeekFrom, Write}};
use binrw::{binrw, BinRead, BinWrite};
use crate::NullReader;

mod color_table;
pub use color_table::*;
mod dye_table;
pub use dye_table::*;

use super::stm::{DyePack, LegacyDyePack, StainId, Stm};

pub const EXT: &'static [&'static str] = &["mtrl"];

pub type Error = binrw::Error;

// additional data flags byte
const FLAG_COLOR_TABLE: u8 = 0x04;
const FLAG_DYE_TABLE: u8 = 0x08;

/// Sampler texture index meaning "no texture".
pub const NO_TEXTURE: u8 = 255;

// ----------

/// A material file: texture/uv set/color set descriptors, at most one color
/// table with its optional dye table, and the shader parameterization block.
#[derive(Debug, Clone, PartialEq)]
pub struct Mtrl {
	pub version: u32,
	pub shader: String,
	pub shader_flags: u32,
	pub shader_keys: Vec<(u32, u32)>,
	pub textures: Vec<Texture>,
	pub uvsets: Vec<String>,
	pub colorsets: Vec<String>,
	/// Raw trailing blob after the descriptor arrays. Byte 0 is the flags
	/// mask (0x04 color table present, 0x08 dye table present), byte 1 packs
	/// the log2 table dimensions; the rest is preserved untouched.
	pub additional_data: Vec<u8>,
	pub color_table: Option<ColorTable>,
	pub dye_table: Option<ColorDyeTable>,
	pub constants: Vec<Constant>,
	pub samplers: Vec<Sampler>,
}

impl Default for Mtrl {
	fn default() -> Self {
		Self {
			version: 0x1030000,
			shader: "character.shpk".to_string(),
			shader_flags: 0,
			shader_keys: Vec::new(),
			textures: Vec::new(),
			uvsets: Vec::new(),
			colorsets: Vec::new(),
			additional_data: Vec::new(),
			color_table: None,
			dye_table: None,
			constants: Vec::new(),
			samplers: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
	pub path: String,
	pub flags: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
	pub id: u32,
	pub value: Vec<u8>,
}

impl Constant {
	pub fn value_as<T: bytemuck::NoUninit + bytemuck::AnyBitPattern>(&mut self) -> &mut [T] {
		bytemuck::cast_slice_mut(&mut self.value)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampler {
	pub id: u32,
	pub flags: u32,
	/// Index into [Mtrl::textures], [NO_TEXTURE] for none.
	pub texture: u8,
}

impl Sampler {
	pub fn u_address_mode(&self) -> AddressMode {
		(self.flags & 0x3).into()
	}

	pub fn v_address_mode(&self) -> AddressMode {
		(self.flags >> 2 & 0x3).into()
	}

	pub fn lod_bias(&self) -> f32 {
		((self.flags as i32) << 12 >> 22) as f32 / 64.0
	}

	pub fn min_lod(&self) -> u32 {
		self.flags >> 20 & 0xF
	}
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
	Wrap   = 0,
	Mirror = 1,
	Clamp  = 2,
	Border = 3,
}

impl From<u32> for AddressMode {
	fn from(value: u32) -> Self {
		match value & 0x3 {
			0 => Self::Wrap,
			1 => Self::Mirror,
			2 => Self::Clamp,
			_ => Self::Border,
		}
	}
}

// ----------

#[binrw]
#[derive(Debug, Clone)]
struct ConstantRaw {
	id: u32,
	offset: u16,
	size: u16,
}

#[binrw]
#[derive(Debug, Clone)]
struct SamplerRaw {
	id: u32,
	flags: u32,
	texture: u8,
	_padding: [u8; 3],
}

// ----------

/// Write side string interner. Strings get offsets in first request order and
/// exact repeats reuse the earlier offset.
pub struct StringPool {
	buf: Vec<u8>,
}

impl StringPool {
	pub fn new() -> Self {
		Self {buf: Vec::new()}
	}

	pub fn find_or_add(&mut self, s: &str) -> u16 {
		let bytes = s.as_bytes();
		let mut offset = 0;
		while offset < self.buf.len() {
			let end = self.buf[offset..].iter().position(|b| *b == 0).map(|p| offset + p).unwrap_or(self.buf.len());
			if &self.buf[offset..end] == bytes {
				return offset as u16;
			}
			offset = end + 1;
		}

		let offset = self.buf.len();
		self.buf.extend_from_slice(bytes);
		self.buf.push(0);
		offset as u16
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.buf
	}
}

// ----------

fn resolve(strings: &[u8], offset: usize) -> binrw::BinResult<String> {
	let Some(slice) = strings.get(offset..) else {
		return Err(binrw::Error::AssertFail {pos: 0, message: format!("string offset {offset} is past the string table")});
	};
	slice.null_terminated().map_err(|e| binrw::Error::Custom {pos: 0, err: Box::new(e)})
}

fn read_pairs<T, R>(reader: &mut R, endian: binrw::Endian, count: usize) -> binrw::BinResult<Vec<(T, T)>> where
T: for<'a> BinRead<Args<'a> = ()>, R: Read + Seek {
	let mut out = Vec::with_capacity(count);
	for _ in 0..count {
		out.push((T::read_options(reader, endian, ())?, T::read_options(reader, endian, ())?));
	}
	Ok(out)
}

fn read_vec<T, R>(reader: &mut R, endian: binrw::Endian, count: usize) -> binrw::BinResult<Vec<T>> where
T: for<'a> BinRead<Args<'a> = ()>, R: Read + Seek {
	let mut out = Vec::with_capacity(count);
	for _ in 0..count {
		out.push(T::read_options(reader, endian, ())?);
	}
	Ok(out)
}

// the data set block degrades instead of failing: sizes matching neither
// table layout stay opaque and flagged tables with too few bytes fall back to
// their defaults, old files must remain loadable
fn read_tables(data: &[u8], flags: u8, dim_logs: u8) -> (Option<ColorTable>, Option<ColorDyeTable>) {
	let opaque = |data: &[u8]| OpaqueColorTable {
		width_log: dim_logs & 0xF,
		height_log: dim_logs >> 4,
		data: data.to_vec(),
	};

	if flags & FLAG_COLOR_TABLE == 0 {
		if !data.is_empty() {
			log::warn!("material carries {} data set bytes without the color table flag, preserving them raw", data.len());
			return (Some(ColorTable::Opaque(opaque(data))), None);
		}
		return (None, None);
	}

	let has_dye = flags & FLAG_DYE_TABLE != 0;
	let len = data.len();
	if len == CurrentColorTable::SIZE || len == CurrentColorTable::SIZE + CurrentColorDyeTable::SIZE {
		let table = CurrentColorTable::from_bytes(data).unwrap_or_default();
		let dye = has_dye.then(|| CurrentColorDyeTable::from_bytes(&data[CurrentColorTable::SIZE..]).unwrap_or_else(|| {
			log::debug!("dye table flagged but absent, using defaults");
			CurrentColorDyeTable::default()
		}));
		(Some(ColorTable::Current(table)), dye.map(ColorDyeTable::Current))
	} else if len == LegacyColorTable::SIZE || len == LegacyColorTable::SIZE + LegacyColorDyeTable::SIZE {
		let table = LegacyColorTable::from_bytes(data).unwrap_or_default();
		let dye = has_dye.then(|| LegacyColorDyeTable::from_bytes(&data[LegacyColorTable::SIZE..]).unwrap_or_else(|| {
			log::debug!("dye table flagged but absent, using defaults");
			LegacyColorDyeTable::default()
		}));
		(Some(ColorTable::Legacy(table)), dye.map(ColorDyeTable::Legacy))
	} else if len == 0 {
		// declared but entirely absent
		log::debug!("color table flagged but the data set is empty, using defaults");
		let dye = has_dye.then(|| ColorDyeTable::Current(CurrentColorDyeTable::default()));
		(Some(ColorTable::Current(CurrentColorTable::default())), dye)
	} else {
		log::warn!("material data set is {len} bytes, not a known color table layout; preserving it raw");
		(Some(ColorTable::Opaque(opaque(data))), None)
	}
}

impl BinRead for Mtrl {
	type Args<'a> = ();

	fn read_options<R: Read + Seek>(reader: &mut R, endian: binrw::Endian, _args: Self::Args<'_>,) -> binrw::BinResult<Self> {
		let version = u32::read_options(reader, endian, ())?;
		let _file_size = u16::read_options(reader, endian, ())?;
		let dataset_size = u16::read_options(reader, endian, ())? as usize;
		let strings_size = u16::read_options(reader, endian, ())? as usize;
		let shader_name_offset = u16::read_options(reader, endian, ())? as usize;
		let texture_count = u8::read_options(reader, endian, ())?;
		let uvset_count = u8::read_options(reader, endian, ())?;
		let colorset_count = u8::read_options(reader, endian, ())?;
		let additional_size = u8::read_options(reader, endian, ())?;

		let texture_infos = read_pairs::<u16, _>(reader, endian, texture_count as usize)?; // name offset, flags
		let uvset_infos = read_pairs::<u16, _>(reader, endian, uvset_count as usize)?; // name offset, index
		let colorset_infos = read_pairs::<u16, _>(reader, endian, colorset_count as usize)?; // name offset, index

		let mut strings = vec![0u8; strings_size];
		reader.read_exact(&mut strings)?;
		let mut additional_data = vec![0u8; additional_size as usize];
		reader.read_exact(&mut additional_data)?;

		// the data set block may legitimately hold fewer bytes than declared
		let pos = reader.stream_position()?;
		let end = reader.seek(SeekFrom::End(0))?;
		reader.seek(SeekFrom::Start(pos))?;
		let mut dataset = vec![0u8; dataset_size.min((end - pos) as usize)];
		reader.read_exact(&mut dataset)?;
		if dataset.len() < dataset_size {
			log::debug!("material data set declares {dataset_size} bytes, only {} are present", dataset.len());
		}

		let flags = additional_data.first().copied().unwrap_or(0);
		let dim_logs = additional_data.get(1).copied().unwrap_or(0);
		let (color_table, dye_table) = read_tables(&dataset, flags, dim_logs);

		let constant_values_size = u16::read_options(reader, endian, ())?;
		let shader_key_count = u16::read_options(reader, endian, ())?;
		let constant_count = u16::read_options(reader, endian, ())?;
		let sampler_count = u16::read_options(reader, endian, ())?;
		let shader_flags = u32::read_options(reader, endian, ())?;

		let shader_keys = read_pairs::<u32, _>(reader, endian, shader_key_count as usize)?;
		let constants_raw = read_vec::<ConstantRaw, _>(reader, endian, constant_count as usize)?;
		let samplers_raw = read_vec::<SamplerRaw, _>(reader, endian, sampler_count as usize)?;
		let mut constant_values = vec![0u8; constant_values_size as usize];
		reader.read_exact(&mut constant_values)?;

		let textures = texture_infos.iter()
			.map(|v| Ok(Texture {path: resolve(&strings, v.0 as usize)?, flags: v.1}))
			.collect::<binrw::BinResult<Vec<_>>>()?;

		let mut uvsets = Vec::with_capacity(uvset_count as usize);
		for i in 0..uvset_count as u16 {
			let Some(info) = uvset_infos.iter().find(|v| v.1 == i) else {
				return Err(binrw::Error::AssertFail {pos: 0, message: format!("uv set {i} has no descriptor")});
			};
			uvsets.push(resolve(&strings, info.0 as usize)?);
		}

		let mut colorsets = Vec::with_capacity(colorset_count as usize);
		for i in 0..colorset_count as u16 {
			let Some(info) = colorset_infos.iter().find(|v| v.1 == i) else {
				return Err(binrw::Error::AssertFail {pos: 0, message: format!("color set {i} has no descriptor")});
			};
			colorsets.push(resolve(&strings, info.0 as usize)?);
		}

		let mut constants = Vec::with_capacity(constants_raw.len());
		for raw in constants_raw {
			let Some(value) = constant_values.get(raw.offset as usize..raw.offset as usize + raw.size as usize) else {
				return Err(binrw::Error::AssertFail {pos: 0, message: format!("constant {:#x} points past the value blob", raw.id)});
			};
			constants.push(Constant {id: raw.id, value: value.to_vec()});
		}

		Ok(Self {
			version,
			shader: resolve(&strings, shader_name_offset)?,
			shader_flags,
			shader_keys,
			textures,
			uvsets,
			colorsets,
			additional_data,
			color_table,
			dye_table,
			constants,
			samplers: samplers_raw.into_iter()
				.map(|v| Sampler {id: v.id, flags: v.flags, texture: v.texture})
				.collect(),
		})
	}
}

impl BinWrite for Mtrl {
	type Args<'a> = ();

	// the pool and the variable length sections have to be emitted before
	// their sizes exist, so the header's size fields are patched afterwards
	fn write_options<W: Write + Seek>(&self, writer: &mut W, endian: binrw::Endian, _args: Self::Args<'_>,) -> binrw::BinResult<()> {
		let start = writer.stream_position()?;

		// preconditions, checked before anything lands in the stream
		match (&self.color_table, &self.dye_table) {
			(_, None) => {}
			(Some(ColorTable::Current(_)), Some(ColorDyeTable::Current(_))) => {}
			(Some(ColorTable::Legacy(_)), Some(ColorDyeTable::Legacy(_))) => {}
			_ => return Err(binrw::Error::AssertFail {pos: start, message: "a dye table requires a color table of the same generation".to_string()}),
		}
		if self.textures.len() > 255 || self.uvsets.len() > 255 || self.colorsets.len() > 255 {
			return Err(binrw::Error::AssertFail {pos: start, message: "too many descriptors for a material".to_string()});
		}

		let mut additional_data = self.additional_data.clone();
		if additional_data.is_empty() && (self.color_table.is_some() || self.dye_table.is_some()) {
			additional_data.push(0);
		}
		if let Some(flags) = additional_data.first_mut() {
			*flags = *flags & !(FLAG_COLOR_TABLE | FLAG_DYE_TABLE)
				| if self.color_table.is_some() {FLAG_COLOR_TABLE} else {0}
				| if self.dye_table.is_some() {FLAG_DYE_TABLE} else {0};
		}

		self.version.write_options(writer, endian, ())?;
		// file size, data set size, string table size, shader name offset
		[0u16; 4].write_options(writer, endian, ())?;
		(self.textures.len() as u8).write_options(writer, endian, ())?;
		(self.uvsets.len() as u8).write_options(writer, endian, ())?;
		(self.colorsets.len() as u8).write_options(writer, endian, ())?;
		(additional_data.len() as u8).write_options(writer, endian, ())?;

		// descriptor arrays, interning names as they are first used
		let mut pool = StringPool::new();
		for texture in &self.textures {
			pool.find_or_add(&texture.path).write_options(writer, endian, ())?;
			texture.flags.write_options(writer, endian, ())?;
		}
		for (i, name) in self.uvsets.iter().enumerate() {
			pool.find_or_add(name).write_options(writer, endian, ())?;
			(i as u16).write_options(writer, endian, ())?;
		}
		for (i, name) in self.colorsets.iter().enumerate() {
			pool.find_or_add(name).write_options(writer, endian, ())?;
			(i as u16).write_options(writer, endian, ())?;
		}
		let shader_name_offset = pool.find_or_add(&self.shader);

		let strings_size = pool.len() as u16;
		writer.write_all(pool.as_bytes())?;
		writer.write_all(&additional_data)?;

		let dataset_start = writer.stream_position()?;
		if let Some(table) = &self.color_table {
			writer.write_all(table.as_bytes())?;
		}
		if let Some(dye) = &self.dye_table {
			writer.write_all(dye.as_bytes())?;
		}
		let dataset_size = (writer.stream_position()? - dataset_start) as u16;

		// shader parameterization block
		let constant_values_size = self.constants.iter().map(|c| c.value.len()).sum::<usize>();
		(constant_values_size as u16).write_options(writer, endian, ())?;
		(self.shader_keys.len() as u16).write_options(writer, endian, ())?;
		(self.constants.len() as u16).write_options(writer, endian, ())?;
		(self.samplers.len() as u16).write_options(writer, endian, ())?;
		self.shader_flags.write_options(writer, endian, ())?;
		for (key, value) in &self.shader_keys {
			key.write_options(writer, endian, ())?;
			value.write_options(writer, endian, ())?;
		}
		let mut offset = 0u16;
		for constant in &self.constants {
			ConstantRaw {id: constant.id, offset, size: constant.value.len() as u16}.write_options(writer, endian, ())?;
			offset += constant.value.len() as u16;
		}
		for sampler in &self.samplers {
			SamplerRaw {id: sampler.id, flags: sampler.flags, texture: sampler.texture, _padding: [0; 3]}.write_options(writer, endian, ())?;
		}
		for constant in &self.constants {
			writer.write_all(&constant.value)?;
		}

		// back patch the measured sizes
		let end = writer.stream_position()?;
		writer.seek(SeekFrom::Start(start + 4))?;
		((end - start) as u16).write_options(writer, endian, ())?;
		dataset_size.write_options(writer, endian, ())?;
		strings_size.write_options(writer, endian, ())?;
		shader_name_offset.write_options(writer, endian, ())?;
		writer.seek(SeekFrom::Start(end))?;

		Ok(())
	}
}

impl crate::format::external::Bytes<Error> for Mtrl {
	fn read<T>(reader: &mut T) -> Result<Self, Error> where
	T: Read + Seek {
		Mtrl::read_le(reader)
	}

	fn write<T>(&self, writer: &mut T) -> Result<(), Error> where
	T: Write + Seek {
		self.write_le(writer)
	}
}

// ----------

/// What the shader itself knows about its resources; consumed by [Mtrl::gc].
#[derive(Debug, Clone, Default)]
pub struct ShaderUsage {
	/// Shader key id to that key's default value.
	pub key_defaults: HashMap<u32, u32>,
	/// Constant resource id to the component count the shader actually reads.
	pub constants: HashMap<u32, u32>,
}

impl Mtrl {
	/// Merges the stain overrides selected by `stains` into the color table
	/// through the dye table. Materials without a current generation pair are
	/// left untouched. Returns whether any field actually changed.
	pub fn apply_dye(&mut self, stains: &[StainId], stm: &Stm<DyePack>) -> bool {
		match (&mut self.color_table, &self.dye_table) {
			(Some(ColorTable::Current(table)), Some(ColorDyeTable::Current(dyes))) => table.apply_dye(dyes, stains, stm),
			_ => false,
		}
	}

	/// [Mtrl::apply_dye] for the legacy generation.
	pub fn apply_dye_legacy(&mut self, stains: &[StainId], stm: &Stm<LegacyDyePack>) -> bool {
		match (&mut self.color_table, &self.dye_table) {
			(Some(ColorTable::Legacy(table)), Some(ColorDyeTable::Legacy(dyes))) => table.apply_dye(dyes, stains, stm),
			_ => false,
		}
	}

	/// Drops parameterization the shader will never look at: samplers outside
	/// `keep_sampler_ids`, textures no surviving sampler references, keys at
	/// their default value and all zero constants the shader does not know.
	/// Running it twice never changes anything further.
	pub fn gc(&mut self, shader: &ShaderUsage, keep_sampler_ids: &[u32]) {
		self.samplers.retain(|s| keep_sampler_ids.contains(&s.id));

		// textures only stay alive through sampler references
		let mut used = vec![false; self.textures.len()];
		for sampler in &self.samplers {
			if let Some(v) = used.get_mut(sampler.texture as usize) {
				*v = true;
			}
		}
		let mut remap = vec![NO_TEXTURE; self.textures.len()];
		let mut next = 0u8;
		for (i, used) in used.iter().enumerate() {
			if *used {
				remap[i] = next;
				next += 1;
			}
		}
		let mut i = 0;
		self.textures.retain(|_| {
			let keep = used[i];
			i += 1;
			keep
		});
		for sampler in &mut self.samplers {
			if let Some(new) = remap.get(sampler.texture as usize) {
				sampler.texture = *new;
			}
		}

		self.shader_keys.retain(|(key, value)| shader.key_defaults.get(key) != Some(value));
		self.constants.retain(|c| shader.constants.contains_key(&c.id) || c.value.iter().any(|b| *b != 0));
	}
}

// ----------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::format::game::stm::STAIN_COUNT;

	fn sample() -> Mtrl {
		let mut color = CurrentColorTable::default();
		color.row_mut(3).set_roughness(0.5);
		let mut dyes = CurrentColorDyeTable::default();
		dyes.row_mut(12).set_template(12);
		dyes.row_mut(12).set_diffuse(true);

		Mtrl {
			shader_flags: 0x11,
			shader_keys: vec![(0xB616DC5A, 1), (0xD2777173, 3)],
			textures: vec![
				Texture {path: "chara/equipment/e0028/texture/v04_c0101e0028_top_d.tex".to_string(), flags: 0},
				Texture {path: "chara/equipment/e0028/texture/v04_c0101e0028_top_n.tex".to_string(), flags: 0x8000},
			],
			uvsets: vec!["map1".to_string()],
			colorsets: vec!["colorset1".to_string()],
			additional_data: vec![0x0C, 0x55],
			color_table: Some(ColorTable::Current(color)),
			dye_table: Some(ColorDyeTable::Current(dyes)),
			constants: vec![
				Constant {id: 0x36080AD0, value: vec![0, 0, 128, 63]},
				Constant {id: 0x992869AB, value: vec![0; 8]},
			],
			samplers: vec![
				Sampler {id: 0x115306BE, flags: 0x000F0000, texture: 0},
				Sampler {id: 0x0C5EC1F1, flags: 0x000F0001, texture: 1},
			],
			..Default::default()
		}
	}

	fn roundtrip(mtrl: &Mtrl) -> Mtrl {
		let mut buf = std::io::Cursor::new(Vec::new());
		mtrl.write_le(&mut buf).unwrap();
		buf.set_position(0);
		Mtrl::read_le(&mut buf).unwrap()
	}

	#[test]
	fn material_roundtrip() {
		let mtrl = sample();
		let reread = roundtrip(&mtrl);
		assert_eq!(reread, mtrl);
	}

	#[test]
	fn roundtrip_without_tables() {
		let mtrl = Mtrl {
			textures: vec![Texture {path: "common/graphics/texture/dummy.tex".to_string(), flags: 0}],
			samplers: vec![Sampler {id: 1, flags: 0, texture: 0}],
			..Default::default()
		};
		let reread = roundtrip(&mtrl);
		assert_eq!(reread, mtrl);
		assert_eq!(reread.color_table, None);
		assert_eq!(reread.dye_table, None);
	}

	#[test]
	fn roundtrip_legacy_tables() {
		let mut color = LegacyColorTable::default();
		color.row_mut(0).set_diffuse(glam::vec3(0.5, 0.5, 0.5));
		let mtrl = Mtrl {
			colorsets: vec!["colorset1".to_string()],
			color_table: Some(ColorTable::Legacy(color)),
			dye_table: Some(ColorDyeTable::Legacy(LegacyColorDyeTable::default())),
			..Default::default()
		};
		let reread = roundtrip(&mtrl);
		assert_eq!(reread.color_table, mtrl.color_table);
		assert_eq!(reread.dye_table, mtrl.dye_table);
	}

	#[test]
	fn opaque_dataset_roundtrips() {
		let mtrl = Mtrl {
			additional_data: vec![FLAG_COLOR_TABLE, 0x32],
			color_table: Some(ColorTable::Opaque(OpaqueColorTable {width_log: 2, height_log: 3, data: (0..96).collect()})),
			..Default::default()
		};
		let reread = roundtrip(&mtrl);
		assert_eq!(reread.color_table, mtrl.color_table);
	}

	#[test]
	fn string_pool_dedups_in_request_order() {
		let mut pool = StringPool::new();
		assert_eq!(pool.find_or_add("map1"), 0);
		assert_eq!(pool.find_or_add("colorset1"), 5);
		assert_eq!(pool.find_or_add("map1"), 0);
		assert_eq!(pool.find_or_add("map"), 15);
		assert_eq!(pool.as_bytes(), b"map1\0colorset1\0map\0");
	}

	#[test]
	fn mismatched_generations_refuse_to_write() {
		let mtrl = Mtrl {
			color_table: Some(ColorTable::Current(CurrentColorTable::default())),
			dye_table: Some(ColorDyeTable::Legacy(LegacyColorDyeTable::default())),
			..Default::default()
		};
		let mut buf = std::io::Cursor::new(Vec::new());
		assert!(mtrl.write_le(&mut buf).is_err());
		assert!(buf.get_ref().is_empty());
	}

	#[test]
	fn truncated_dye_block_defaults() {
		// a material whose flags promise a dye table the data set never held
		let mut buf = std::io::Cursor::new(Vec::new());
		let mtrl = Mtrl {
			color_table: Some(ColorTable::Current(CurrentColorTable::default())),
			..Default::default()
		};
		mtrl.write_le(&mut buf).unwrap();
		let mut data = buf.into_inner();
		// additional data sits right after the header and the shader name
		let flags_offset = 16 + "character.shpk\0".len();
		assert_eq!(data[flags_offset], FLAG_COLOR_TABLE);
		data[flags_offset] |= FLAG_DYE_TABLE;

		let reread = Mtrl::read_le(&mut std::io::Cursor::new(&data)).unwrap();
		assert_eq!(reread.dye_table, Some(ColorDyeTable::Current(CurrentColorDyeTable::default())));
	}

	#[test]
	fn scenario_dye_application() {
		let mut stm = Stm::<DyePack>::new();
		let mut packs = [DyePack::default(); STAIN_COUNT];
		packs[2].diffuse = glam::vec3(1.0, 0.0, 0.0);
		stm.set(12, &packs);

		let mut mtrl = sample();
		assert!(mtrl.apply_dye(&[3], &stm));
		match &mtrl.color_table {
			Some(ColorTable::Current(table)) => assert_eq!(table.row(12).diffuse(), glam::vec3(1.0, 0.0, 0.0)),
			_ => unreachable!(),
		}

		// identical inputs do nothing the second time
		assert!(!mtrl.apply_dye(&[3], &stm));
	}

	#[test]
	fn unstained_application_is_a_noop() {
		let mut stm = Stm::<DyePack>::new();
		stm.set(12, &[DyePack {diffuse: glam::Vec3::ONE, ..Default::default()}; STAIN_COUNT]);

		let mut mtrl = sample();
		let before = match &mtrl.color_table {
			Some(ColorTable::Current(table)) => table.as_bytes().to_vec(),
			_ => unreachable!(),
		};

		assert!(!mtrl.apply_dye(&[0, 0], &stm));
		assert!(!mtrl.apply_dye(&[], &stm));
		match &mtrl.color_table {
			Some(ColorTable::Current(table)) => assert_eq!(table.as_bytes(), &before[..]),
			_ => unreachable!(),
		}
	}

	#[test]
	fn unknown_template_is_a_noop() {
		let stm = Stm::<DyePack>::new();
		let mut mtrl = sample();
		assert!(!mtrl.apply_dye(&[3], &stm));
	}

	#[test]
	fn generation_mismatch_never_dyes() {
		let stm = Stm::<LegacyDyePack>::new();
		let mut mtrl = sample();
		assert!(!mtrl.apply_dye_legacy(&[3], &stm));
	}

	#[test]
	fn gc_drops_dead_parameterization() {
		let mut mtrl = sample();
		let shader = ShaderUsage {
			key_defaults: [(0xB616DC5A, 1u32)].into_iter().collect(),
			constants: [(0x36080AD0, 3u32)].into_iter().collect(),
		};
		// drop the second sampler and with it its texture
		mtrl.gc(&shader, &[0x115306BE]);

		assert_eq!(mtrl.samplers.len(), 1);
		assert_eq!(mtrl.textures.len(), 1);
		assert_eq!(mtrl.samplers[0].texture, 0);
		// key at its shader default went away, the off default key stayed
		assert_eq!(mtrl.shader_keys, vec![(0xD2777173, 3)]);
		// the all zero constant was unknown to the shader
		assert_eq!(mtrl.constants.len(), 1);
		assert_eq!(mtrl.constants[0].id, 0x36080AD0);

		let after = mtrl.clone();
		mtrl.gc(&shader, &[0x115306BE]);
		assert_eq!(mtrl, after);
	}

	#[test]
	fn sampler_flag_decoding() {
		let sampler = Sampler {id: 0, flags: 0b0110, texture: NO_TEXTURE};
		assert_eq!(sampler.u_address_mode(), AddressMode::Clamp);
		assert_eq!(sampler.v_address_mode(), AddressMode::Mirror);
		assert_eq!(sampler.min_lod(), 0);

		let biased = Sampler {id: 0, flags: 64 << 10, texture: NO_TEXTURE};
		assert_eq!(biased.lod_bias(), 1.0);
	}

	#[test]
	fn constant_values_as_floats() {
		let mut constant = Constant {id: 1, value: vec![0, 0, 128, 63, 0, 0, 0, 64]};
		let floats = constant.value_as::<f32>();
		assert_eq!(floats.len(), 2);
		assert_eq!(floats[0], 1.0);
		assert_eq!(floats[1], 2.0);
		floats[1] = 0.5;
		assert_eq!(constant.value, vec![0, 0, 128, 63, 0, 0, 0, 63]);
	}
}
