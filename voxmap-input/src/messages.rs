use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::warn;
use thiserror::Error;
use voxmap_core::undistortion::StampedPointcloud;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl FieldType {
    /// The size of the type in bytes.
    pub fn len(&self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 | FieldType::F32 => 4,
            FieldType::F64 => 8,
        }
    }

}

/// Describes one per-point attribute within the packed point data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub datatype: FieldType,
}

/// A generic packed pointcloud message, as delivered by the transport
/// layer: named fields at fixed byte offsets within each point record.
#[derive(Debug, Clone)]
pub struct PointcloudMessage {
    pub frame_id: String,
    pub stamp_nsec: u64,
    pub width: usize,
    pub height: usize,
    pub point_step: usize,
    pub row_step: usize,
    pub fields: Vec<Field>,
    pub endianness: Endianness,
    pub data: Vec<u8>,
}

impl PointcloudMessage {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn num_points(&self) -> usize {
        self.width * self.height
    }
}

/// The sensor types the input pipeline knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicType {
    /// Plain pointclouds with x/y/z fields and no per-point time.
    PointCloud2,
    /// Ouster pointclouds, which carry a `t` field of u32 nanoseconds.
    Ouster,
    #[cfg(feature = "livox")]
    Livox,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("pointcloud message contains no points")]
    Empty,

    #[error("pointcloud message has a missing or out-of-order field {0}")]
    MissingField(String),

    #[error("pointcloud field {name} has unsupported type {datatype:?}")]
    UnsupportedFieldType { name: String, datatype: FieldType },

    #[error("pointcloud data is shorter than its declared layout")]
    Truncated,
}

fn read_f32(data: &[u8], offset: usize, endianness: Endianness) -> f32 {
    match endianness {
        Endianness::Big => BigEndian::read_f32(&data[offset..offset + 4]),
        Endianness::Little => LittleEndian::read_f32(&data[offset..offset + 4]),
    }
}

fn read_u32(data: &[u8], offset: usize, endianness: Endianness) -> u32 {
    match endianness {
        Endianness::Big => BigEndian::read_u32(&data[offset..offset + 4]),
        Endianness::Little => LittleEndian::read_u32(&data[offset..offset + 4]),
    }
}

/// Checks that the x, y and z fields are present, adjacent and of type
/// f32, and returns the x field's byte offset.
fn position_field_offset(msg: &PointcloudMessage) -> Result<usize, MessageError> {
    let x_index = msg
        .fields
        .iter()
        .position(|field| field.name == "x")
        .ok_or_else(|| MessageError::MissingField("x".to_string()))?;
    for (i, name) in ["y", "z"].iter().enumerate() {
        match msg.fields.get(x_index + 1 + i) {
            Some(field) if field.name == *name => {}
            _ => return Err(MessageError::MissingField(name.to_string())),
        }
    }
    for field in &msg.fields[x_index..x_index + 3] {
        if field.datatype != FieldType::F32 {
            return Err(MessageError::UnsupportedFieldType {
                name: field.name.clone(),
                datatype: field.datatype,
            });
        }
    }
    Ok(msg.fields[x_index].offset)
}

/// Converts a packed pointcloud message into the engine's stamped
/// pointcloud format.
///
/// Per-point times are filled in for sensor types that provide them when
/// `undistort_motion` is requested; otherwise all offsets are zero, which
/// disables undistortion for those points.
pub fn stamped_pointcloud_from_message(
    msg: &PointcloudMessage,
    topic_type: TopicType,
    sensor_frame_override: Option<&str>,
    time_offset_nsec: i64,
    undistort_motion: bool,
) -> Result<StampedPointcloud, MessageError> {
    let num_points = msg.num_points();
    if num_points == 0 {
        return Err(MessageError::Empty);
    }
    if msg.height > 0
        && msg.data.len() < (msg.height - 1) * msg.row_step + msg.width * msg.point_step
    {
        return Err(MessageError::Truncated);
    }

    let position_offset = position_field_offset(msg)?;

    let time_field = if undistort_motion {
        match topic_type {
            TopicType::Ouster => match msg.field("t") {
                Some(field) if field.datatype == FieldType::U32 => Some(field.offset),
                Some(field) => {
                    return Err(MessageError::UnsupportedFieldType {
                        name: field.name.clone(),
                        datatype: field.datatype,
                    });
                }
                None => {
                    warn!(
                        "Pointcloud topic type is Ouster, but the message has no time field \
                         \"t\". It will not be undistorted."
                    );
                    None
                }
            },
            #[cfg(feature = "livox")]
            TopicType::Livox => {
                warn!(
                    "Livox pointclouds carry their time offsets in the custom message type; \
                     this packed message will not be undistorted."
                );
                None
            }
            TopicType::PointCloud2 => {
                warn!(
                    "Pointcloud undistortion is enabled, but not supported for plain \
                     PointCloud2 messages. They will not be undistorted."
                );
                None
            }
        }
    } else {
        None
    };

    let stamp_nsec = msg.stamp_nsec.saturating_add_signed(time_offset_nsec);
    let sensor_frame = sensor_frame_override.unwrap_or(&msg.frame_id).to_string();
    let mut stamped_pointcloud = StampedPointcloud::new(stamp_nsec, sensor_frame, num_points);

    for row in 0..msg.height {
        for col in 0..msg.width {
            let point_offset = row * msg.row_step + col * msg.point_step;
            let base = point_offset + position_offset;
            let x = read_f32(&msg.data, base, msg.endianness);
            let y = read_f32(&msg.data, base + 4, msg.endianness);
            let z = read_f32(&msg.data, base + 8, msg.endianness);
            let time_offset = time_field
                .map(|offset| read_u32(&msg.data, point_offset + offset, msg.endianness))
                .unwrap_or(0);
            stamped_pointcloud.push(x, y, z, time_offset);
        }
    }
    Ok(stamped_pointcloud)
}

/// Livox custom messages already carry per-point time offsets.
#[cfg(feature = "livox")]
pub mod livox {
    use super::MessageError;
    use voxmap_core::undistortion::StampedPointcloud;

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct LivoxCustomPoint {
        pub x: f32,
        pub y: f32,
        pub z: f32,
        pub offset_time: u32,
    }

    #[derive(Debug, Clone)]
    pub struct LivoxCustomMessage {
        pub frame_id: String,
        pub timebase_nsec: u64,
        pub points: Vec<LivoxCustomPoint>,
    }

    pub fn stamped_pointcloud_from_livox(
        msg: &LivoxCustomMessage,
        sensor_frame_override: Option<&str>,
        time_offset_nsec: i64,
    ) -> Result<StampedPointcloud, MessageError> {
        if msg.points.is_empty() {
            return Err(MessageError::Empty);
        }
        let stamp_nsec = msg.timebase_nsec.saturating_add_signed(time_offset_nsec);
        let sensor_frame = sensor_frame_override.unwrap_or(&msg.frame_id).to_string();
        let mut stamped_pointcloud =
            StampedPointcloud::new(stamp_nsec, sensor_frame, msg.points.len());
        for point in &msg.points {
            stamped_pointcloud.push(point.x, point.y, point.z, point.offset_time);
        }
        Ok(stamped_pointcloud)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        stamped_pointcloud_from_message, Endianness, Field, FieldType, MessageError,
        PointcloudMessage, TopicType,
    };

    fn ouster_message(points: &[(f32, f32, f32, u32)]) -> PointcloudMessage {
        let mut data = Vec::new();
        for &(x, y, z, t) in points {
            data.extend_from_slice(&x.to_le_bytes());
            data.extend_from_slice(&y.to_le_bytes());
            data.extend_from_slice(&z.to_le_bytes());
            data.extend_from_slice(&t.to_le_bytes());
        }
        PointcloudMessage {
            frame_id: "os_sensor".to_string(),
            stamp_nsec: 1_000_000_000,
            width: points.len(),
            height: 1,
            point_step: 16,
            row_step: points.len() * 16,
            fields: vec![
                Field {
                    name: "x".to_string(),
                    offset: 0,
                    datatype: FieldType::F32,
                },
                Field {
                    name: "y".to_string(),
                    offset: 4,
                    datatype: FieldType::F32,
                },
                Field {
                    name: "z".to_string(),
                    offset: 8,
                    datatype: FieldType::F32,
                },
                Field {
                    name: "t".to_string(),
                    offset: 12,
                    datatype: FieldType::U32,
                },
            ],
            endianness: Endianness::Little,
            data,
        }
    }

    #[test]
    fn decodes_positions_and_time_offsets() {
        let msg = ouster_message(&[
            (1.0, 0.0, 0.0, 0),
            (1.0, 0.0, 0.0, 10_000_000),
            (1.0, 0.0, 0.0, 20_000_000),
        ]);
        let cloud =
            stamped_pointcloud_from_message(&msg, TopicType::Ouster, None, 0, true).unwrap();
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud.time_base(), 1_000_000_000);
        assert_eq!(cloud.start_time(), 1_000_000_000);
        assert_eq!(cloud.end_time(), 1_020_000_000);
        assert_eq!(cloud.sensor_frame(), "os_sensor");
        assert_eq!(cloud.points()[1].position.x, 1.0);
        assert_eq!(cloud.points()[1].time_offset, 10_000_000);
    }

    #[test]
    fn frame_override_and_time_offset_apply() {
        let msg = ouster_message(&[(1.0, 2.0, 3.0, 0)]);
        let cloud = stamped_pointcloud_from_message(
            &msg,
            TopicType::Ouster,
            Some("lidar"),
            500_000_000,
            false,
        )
        .unwrap();
        assert_eq!(cloud.sensor_frame(), "lidar");
        assert_eq!(cloud.time_base(), 1_500_000_000);
        // Undistortion disabled: all time offsets are zero.
        assert_eq!(cloud.points()[0].time_offset, 0);
    }

    #[test]
    fn missing_position_fields_are_rejected() {
        let mut msg = ouster_message(&[(1.0, 2.0, 3.0, 0)]);
        msg.fields.remove(1);
        assert_eq!(
            stamped_pointcloud_from_message(&msg, TopicType::Ouster, None, 0, false).unwrap_err(),
            MessageError::MissingField("y".to_string())
        );
    }

    #[test]
    fn empty_messages_are_rejected() {
        let mut msg = ouster_message(&[(1.0, 2.0, 3.0, 0)]);
        msg.width = 0;
        msg.data.clear();
        msg.row_step = 0;
        assert_eq!(
            stamped_pointcloud_from_message(&msg, TopicType::Ouster, None, 0, false).unwrap_err(),
            MessageError::Empty
        );
    }

    #[test]
    fn truncated_data_is_rejected() {
        let mut msg = ouster_message(&[(1.0, 2.0, 3.0, 0), (4.0, 5.0, 6.0, 0)]);
        msg.data.truncate(20);
        assert_eq!(
            stamped_pointcloud_from_message(&msg, TopicType::Ouster, None, 0, false).unwrap_err(),
            MessageError::Truncated
        );
    }

    #[test]
    fn missing_time_field_degrades_to_no_undistortion() {
        let mut msg = ouster_message(&[(1.0, 2.0, 3.0, 7)]);
        msg.fields.pop();
        let cloud =
            stamped_pointcloud_from_message(&msg, TopicType::Ouster, None, 0, true).unwrap();
        assert_eq!(cloud.points()[0].time_offset, 0);
    }
}
