use std;

use crate::page::PageSize;

/// 開始位置がページ境界に揃えられた固定容量のバイト列.
///
/// チャンク用のメモリ領域として利用可能なように、
/// 確保後のリサイズは提供していない(チャンクの領域長は生存期間を通じて不変).
///
/// 内部的なメモリ管理の方法が異なるだけで、基本的には通常のバイト列(e.g., `&[u8]`)と
/// 同様に扱うことが可能.
#[derive(Debug)]
pub struct AlignedBytes {
    buf: Vec<u8>,
    offset: usize,
    len: usize,
    page_size: PageSize,
}
impl AlignedBytes {
    /// 新しい`AlignedBytes`インスタンスを生成する.
    ///
    /// 結果のバイト列の初期値は未定義.
    pub fn new(size: usize, page_size: PageSize) -> Self {
        // バッファの前後をページ境界に合わせて十分なだけの領域を確保しておく
        let capacity = size + page_size.as_u32() as usize - 1;

        // ゼロ埋めのコストを省くためにunsafeを使用
        let mut buf = Vec::with_capacity(capacity);
        unsafe {
            buf.set_len(capacity);
        }

        let offset = alignment_offset(&buf, page_size);
        AlignedBytes {
            buf,
            offset,
            len: size,
            page_size,
        }
    }

    /// `bytes`と等しい内容を持つ`AlignedBytes`インスタンスを生成する.
    pub fn from_bytes(bytes: &[u8], page_size: PageSize) -> Self {
        let mut aligned = Self::new(bytes.len(), page_size);
        aligned.as_mut().copy_from_slice(bytes);
        aligned
    }

    /// このバイト列のページサイズを返す.
    pub fn page_size(&self) -> PageSize {
        self.page_size
    }
}
impl std::ops::Deref for AlignedBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.buf[self.offset..][..self.len]
    }
}
impl std::ops::DerefMut for AlignedBytes {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.offset..][..self.len]
    }
}
impl AsRef<[u8]> for AlignedBytes {
    fn as_ref(&self) -> &[u8] {
        &*self
    }
}
impl AsMut<[u8]> for AlignedBytes {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut *self
    }
}
impl Clone for AlignedBytes {
    fn clone(&self) -> Self {
        AlignedBytes::from_bytes(self.as_ref(), self.page_size)
    }
}

fn alignment_offset(buf: &[u8], page_size: PageSize) -> usize {
    let ptr = buf.as_ptr() as usize;
    let aligned_ptr = page_size.ceil_align(ptr as u64) as usize;
    aligned_ptr - ptr
}
