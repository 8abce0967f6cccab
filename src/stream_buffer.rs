use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

/// 録音クリップを保持するメモリ上のバイト列
///
/// 録音中は末尾への追記、再生・音量調整時はシーク可能なストリームとして扱う。
/// 位置は常に `[0, len]` の範囲に収まる。
///
/// バイト列は `Arc` で共有されるため `clone()` は安価。
/// 書き込みはコピーオンライトなので、クローンした読み出し側には影響しない。
#[derive(Clone, Debug, Default)]
pub struct StreamBuffer {
    data: Arc<Vec<u8>>,
    position: u64,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(bytes),
            position: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// 先頭に戻す（失敗しない）
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// バイト列をそのまま書き出す
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.data)?;
        writer.flush()
    }

    /// ファイルに保存
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = fs::File::create(path.as_ref())?;
        self.write_to(&mut file)
    }
}

impl Read for StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.position.min(self.len()) as usize;
        let available = &self.data[start..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for StreamBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pos = self.position as usize;
        let data = Arc::make_mut(&mut self.data);

        // 既存部分は上書き、はみ出した分は追記
        let overlap = data.len().saturating_sub(pos).min(buf.len());
        data[pos..pos + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);

        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for StreamBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.len() as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(offset) => len + offset as i128,
            SeekFrom::Current(offset) => self.position as i128 + offset as i128,
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "先頭より前にはシークできません",
            ));
        }

        // 末尾を超える位置は末尾にクランプ
        self.position = target.min(len) as u64;
        Ok(self.position)
    }
}
