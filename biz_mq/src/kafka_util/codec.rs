use crate::entitys::message_entity::Message;
use crate::error::MqError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

const LEN_PREFIX: usize = 4;

/// key/value 帧编解码
///
/// 帧格式：`[u32 key_len][key][u32 value_len][value]`，长度为大端序。
/// 分区提示不进入帧，由写入端在路由时消费。
pub struct MessageCodec;

impl MessageCodec {
    pub fn encoded_len(msg: &Message) -> usize {
        LEN_PREFIX * 2 + msg.size()
    }

    pub fn encode(msg: &Message) -> Result<Bytes, MqError> {
        let key_len = u32::try_from(msg.key().len())
            .map_err(|_| MqError::Codec(format!("key too large: {} bytes", msg.key().len())))?;
        let value_len = u32::try_from(msg.value().len())
            .map_err(|_| MqError::Codec(format!("value too large: {} bytes", msg.value().len())))?;

        let mut buf = BytesMut::with_capacity(Self::encoded_len(msg));
        buf.put_u32(key_len);
        buf.put_slice(msg.key());
        buf.put_u32(value_len);
        buf.put_slice(msg.value());
        Ok(buf.freeze())
    }

    pub fn decode(frame: &Bytes) -> Result<Message, MqError> {
        let mut buf = frame.clone();
        let key = Self::take_field(&mut buf, "key")?;
        let value = Self::take_field(&mut buf, "value")?;
        if buf.has_remaining() {
            return Err(MqError::Codec(format!("{} trailing bytes after value", buf.remaining())));
        }
        Ok(Message::new(key, value))
    }

    fn take_field(buf: &mut Bytes, name: &str) -> Result<Bytes, MqError> {
        if buf.remaining() < LEN_PREFIX {
            return Err(MqError::Codec(format!("truncated {name} length")));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(MqError::Codec(format!(
                "truncated {name}: need {len} bytes, have {}",
                buf.remaining()
            )));
        }
        Ok(buf.split_to(len))
    }
}
