//! ページを等分割するサブページアロケータ.
//!
//! サブページは、チャンクの一ページを`page_size / elem_size`個の等サイズ要素に分割し、
//! 占有状況を一要素一ビットのビットマップで管理する.
//!
//! 空き容量のあるサブページは、サイズクラス毎の[リスト][SubpagePool]に連結され、
//! プール管理層はそのリストを通じて割当先のページを見つける.
//! リストへの出入りはこのモジュールが担う.
//!
//! [SubpagePool]: ./struct.SubpagePool.html
pub use self::pool::{Iter, SubpageKey, SubpagePool, SubpagePools};

mod pool;

use crate::chunk::ChunkId;
use crate::page::PageSize;

/// 一ビットで一要素を表すビットマップのワード幅.
const WORD_BITS: u32 = 64;

/// サブページの解放操作の結果.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// サブページはまだ使用中であり、ページを回収してはいけない.
    StillInUse,

    /// サブページは完全に空になったので、ページを木へ返却してよい.
    Reclaimable,
}

/// 一つのページを等サイズ要素群へ分割するアロケータ.
///
/// インスタンスはページスロット毎に遅延生成され、
/// ページの生存期間を通じて(要素サイズを替えながら)再利用される.
/// 非活性状態(`is_in_use() == false`)のインスタンスは、
/// 別の要素サイズで再初期化できる.
#[derive(Debug)]
pub struct Subpage {
    chunk: ChunkId,
    node: u32,
    page_offset: u32,
    page_size: PageSize,
    elem_size: u32,
    max_elems: u32,
    bitmap: Vec<u64>,
    bitmap_len: usize,
    next_avail: i32,
    available: u32,
    in_use: bool,
    pool_slot: Option<usize>,
}
impl Subpage {
    /// 許容される要素サイズの最小値.
    ///
    /// ビットマップはこの値を前提に確保されるため、
    /// これ未満の要素サイズで初期化することはできない.
    pub const MIN_ELEM_SIZE: u32 = 16;

    pub(crate) fn new(chunk: ChunkId, node: u32, page_offset: u32, page_size: PageSize) -> Self {
        // 最小要素サイズで分割した場合に必要なワード数だけ、最初に確保しておく
        let words = (page_size.as_u32() / Self::MIN_ELEM_SIZE / WORD_BITS) as usize;
        Subpage {
            chunk,
            node,
            page_offset,
            page_size,
            elem_size: 0,
            max_elems: 0,
            bitmap: vec![0; words],
            bitmap_len: 0,
            next_avail: -1,
            available: 0,
            in_use: false,
            pool_slot: None,
        }
    }

    /// 指定の要素サイズでこのサブページを(再)初期化して、リストへ挿入する.
    ///
    /// 非活性状態のインスタンスに対してのみ呼び出せる.
    pub(crate) fn init(&mut self, pool: &mut SubpagePool, elem_size: u32) {
        assert!(
            elem_size >= Self::MIN_ELEM_SIZE
                && elem_size < self.page_size.as_u32()
                && elem_size % Self::MIN_ELEM_SIZE == 0,
            "elem_size={}",
            elem_size
        );
        debug_assert!(!self.in_use);
        debug_assert!(self.pool_slot.is_none());
        debug_assert_eq!(pool.elem_size(), elem_size);

        self.in_use = true;
        self.elem_size = elem_size;
        self.max_elems = self.page_size.as_u32() / elem_size;
        self.available = self.max_elems;
        self.next_avail = 0;
        self.bitmap_len =
            (self.max_elems / WORD_BITS) as usize + usize::from(self.max_elems % WORD_BITS != 0);
        for word in &mut self.bitmap[..self.bitmap_len] {
            *word = 0;
        }
        self.link(pool);
    }

    /// 空き要素を一つ確保して、その要素番号を返す.
    ///
    /// 空きが無い場合、あるいは非活性状態の場合には`None`が返される.
    ///
    /// 最後の空き要素が確保された時点で、このサブページはリストから外される
    /// (チャンク側のページ配列からは引き続き到達可能).
    pub(crate) fn allocate(&mut self, pool: &mut SubpagePool) -> Option<u32> {
        if self.available == 0 || !self.in_use {
            return None;
        }

        let index = self.next_index()?;
        let q = (index / WORD_BITS) as usize;
        let r = index % WORD_BITS;
        debug_assert_eq!(self.bitmap[q] >> r & 1, 0);
        self.bitmap[q] |= 1 << r;

        self.available -= 1;
        if self.available == 0 {
            self.unlink(pool);
        }
        Some(index)
    }

    /// 要素番号`index`の要素を解放する.
    ///
    /// 返り値が[`FreeOutcome::Reclaimable`]の場合、このサブページは非活性化されており、
    /// 呼び出し側はページ全体を木へ返却する必要がある.
    ///
    /// [`FreeOutcome::Reclaimable`]: ./enum.FreeOutcome.html#variant.Reclaimable
    pub(crate) fn free(&mut self, pool: &mut SubpagePool, index: u32) -> FreeOutcome {
        debug_assert!(self.in_use);
        debug_assert!(index < self.max_elems);
        let q = (index / WORD_BITS) as usize;
        let r = index % WORD_BITS;
        debug_assert_ne!(self.bitmap[q] >> r & 1, 0);
        self.bitmap[q] ^= 1 << r;

        // 解放直後のスロットは次回の確保で最優先に再利用する
        self.next_avail = index as i32;

        self.available += 1;
        if self.available == 1 {
            // 満杯でリストから外れていたので、空きができた今、戻しておく
            self.link(pool);
            return FreeOutcome::StillInUse;
        }
        if self.available < self.max_elems {
            return FreeOutcome::StillInUse;
        }

        // ページは完全に空. ただし、このサイズクラスの最後の一枚は
        // キャッシュとして残しておく
        if pool.len() == 1 {
            return FreeOutcome::StillInUse;
        }
        self.in_use = false;
        self.unlink(pool);
        FreeOutcome::Reclaimable
    }

    /// このサブページが現在分割に使っている要素サイズを返す.
    pub fn elem_size(&self) -> u32 {
        self.elem_size
    }

    /// このサブページが分割できる要素の総数を返す.
    pub fn max_elems(&self) -> u32 {
        self.max_elems
    }

    /// 現在の空き要素数を返す.
    pub fn available(&self) -> u32 {
        self.available
    }

    /// このサブページが活性状態(いずれかのサイズクラスの割当に使用中)かどうかを返す.
    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// このサブページが重なっているページ(木の葉)のノード番号を返す.
    pub fn node(&self) -> u32 {
        self.node
    }

    /// ページのチャンク内バイトオフセットを返す.
    pub fn page_offset(&self) -> u32 {
        self.page_offset
    }

    fn next_index(&mut self) -> Option<u32> {
        let hint = self.next_avail;
        if hint >= 0 {
            self.next_avail = -1;
            return Some(hint as u32);
        }
        self.find_next_avail()
    }

    fn find_next_avail(&self) -> Option<u32> {
        for (i, &bits) in self.bitmap[..self.bitmap_len].iter().enumerate() {
            if !bits != 0 {
                return self.find_next_avail_in_word(i, bits);
            }
        }
        None
    }

    fn find_next_avail_in_word(&self, word: usize, mut bits: u64) -> Option<u32> {
        let base = word as u32 * WORD_BITS;
        for j in 0..WORD_BITS {
            if bits & 1 == 0 {
                let index = base + j;
                // 末尾ワードには要素数を超えた余りビットがあり得るので、選んではいけない
                if index < self.max_elems {
                    return Some(index);
                }
                break;
            }
            bits >>= 1;
        }
        None
    }

    fn link(&mut self, pool: &mut SubpagePool) {
        debug_assert!(self.pool_slot.is_none());
        let key = SubpageKey {
            chunk: self.chunk,
            node: self.node,
        };
        self.pool_slot = Some(pool.insert_after_head(key));
    }

    fn unlink(&mut self, pool: &mut SubpagePool) {
        let slot = self.pool_slot.take().expect("the subpage must be linked");
        let key = pool.remove(slot);
        debug_assert_eq!(key.node, self.node);
    }
}
