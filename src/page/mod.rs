//! チャンクの分割単位であるページ関連の構成要素.
use crate::{ErrorKind, Result};

pub use self::aligned_bytes::AlignedBytes;

mod aligned_bytes;

/// チャンクを分割する最小単位であるページのサイズを表現するための構造体.
///
/// "ページ"は、バディ二分木が直接確保・解放を行う最小の領域単位であり、
/// ページ未満のサイズの要求はページを更に等分割するサブページアロケータが担当する.
///
/// ページサイズの2冪境界にアライメントを行うための補助メソッド群も提供している.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageSize(u32);
impl PageSize {
    /// 許容されるページサイズの最小値.
    pub const MIN: u32 = 4096;

    /// 許容可能な最小のページサイズを持つ`PageSize`インスタンスを返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagepool::page::PageSize;
    ///
    /// assert_eq!(PageSize::min().as_u32(), PageSize::MIN);
    /// ```
    pub fn min() -> Self {
        PageSize(Self::MIN)
    }

    /// 指定された値のページサイズを表現する`PageSize`インスタンスを生成する.
    ///
    /// # Errors
    ///
    /// 以下の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される:
    ///
    /// - `page_size`が`PageSize::MIN`未満
    /// - `page_size`が2の冪乗ではない
    ///
    /// # Examples
    ///
    /// ```
    /// use pagepool::ErrorKind;
    /// use pagepool::page::PageSize;
    ///
    /// assert_eq!(PageSize::new(4096).ok().map(|p| p.as_u32()), Some(4096));
    /// assert_eq!(PageSize::new(8192).ok().map(|p| p.as_u32()), Some(8192));
    ///
    /// assert_eq!(PageSize::new(2048).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// assert_eq!(PageSize::new(12288).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// ```
    #[allow(clippy::new_ret_no_self)]
    pub fn new(page_size: u32) -> Result<Self> {
        track_assert!(page_size >= Self::MIN, ErrorKind::InvalidInput);
        track_assert!(page_size.is_power_of_two(), ErrorKind::InvalidInput);
        Ok(PageSize(page_size))
    }

    /// ページサイズの対数(`log2`)を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagepool::page::PageSize;
    ///
    /// assert_eq!(PageSize::new(8192).unwrap().shift(), 13);
    /// ```
    pub fn shift(self) -> u8 {
        self.0.trailing_zeros() as u8
    }

    /// 指定位置より後方の最初のページ境界位置を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagepool::page::PageSize;
    ///
    /// let page_size = PageSize::new(4096).unwrap();
    /// assert_eq!(page_size.ceil_align(0), 0);
    /// assert_eq!(page_size.ceil_align(1), 4096);
    /// assert_eq!(page_size.ceil_align(4096), 4096);
    /// ```
    pub fn ceil_align(self, position: u64) -> u64 {
        let page_size = u64::from(self.0);
        (position + page_size - 1) / page_size * page_size
    }

    /// 指定位置より前方の最初のページ境界位置を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagepool::page::PageSize;
    ///
    /// let page_size = PageSize::new(4096).unwrap();
    /// assert_eq!(page_size.floor_align(0), 0);
    /// assert_eq!(page_size.floor_align(1), 0);
    /// assert_eq!(page_size.floor_align(4096), 4096);
    /// ```
    pub fn floor_align(self, position: u64) -> u64 {
        let page_size = u64::from(self.0);
        (position / page_size) * page_size
    }

    /// ページサイズ値を`u32`に変換して返す.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}
impl Default for PageSize {
    fn default() -> Self {
        PageSize::min()
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;

    #[test]
    fn new_works() -> TestResult {
        assert_eq!(track!(PageSize::new(4096))?.as_u32(), 4096);
        assert_eq!(track!(PageSize::new(65536))?.as_u32(), 65536);

        assert!(PageSize::new(0).is_err());
        assert!(PageSize::new(512).is_err());
        assert!(PageSize::new(4096 + 4096 / 2).is_err());
        Ok(())
    }

    #[test]
    fn shift_works() -> TestResult {
        assert_eq!(track!(PageSize::new(4096))?.shift(), 12);
        assert_eq!(track!(PageSize::new(8192))?.shift(), 13);
        assert_eq!(track!(PageSize::new(1 << 20))?.shift(), 20);
        Ok(())
    }

    #[test]
    fn align_works() -> TestResult {
        let page_size = track!(PageSize::new(4096))?;
        assert_eq!(page_size.ceil_align(4097), 8192);
        assert_eq!(page_size.floor_align(8191), 4096);
        Ok(())
    }
}
