//! バディ二分木による固定長領域(チャンク)の管理.
//!
//! チャンクは`page_size << max_order`バイトの連続領域であり、
//! 完全二分木を重ねることで、ページの2冪倍の連続領域("ラン")の
//! 確保・解放を`O(max_order)`で行う.
//!
//! ページ未満のサイズの要求は、木から一ページを切り出した上で
//! [サブページアロケータ][subpage]に委譲される.
//!
//! このモジュール自体は、メモリ領域への読み書きとは切り離されており、
//! 領域内のオフセット計算のみを担当する.
//! 確保結果の[Handle]からは、[Portion](オフセットと長さの組)が導出できる.
//!
//! [subpage]: ../subpage/index.html
//! [Handle]: ./enum.Handle.html
//! [Portion]: ./struct.Portion.html
use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::fmt;
use uuid::Uuid;

pub use self::handle::{Handle, HandleU64};

use self::buddy_tree::BuddyTree;
use crate::metrics::ChunkAllocatorMetrics;
use crate::page::PageSize;
use crate::subpage::{FreeOutcome, Subpage, SubpagePool, SubpagePools};
use crate::{ErrorKind, Result};

mod buddy_tree;
mod handle;

/// 許容される木の深さ(`max_order`)の最大値.
pub const MAX_ORDER_LIMIT: u8 = 14;

/// チャンクインスタンスの識別子.
///
/// サイズクラスのリストは複数のチャンクを跨ぐため、
/// リスト内のキーにはこの識別子が含まれる.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(Uuid);
impl ChunkId {
    /// 識別子のUUID表現を返す.
    pub fn as_uuid(self) -> Uuid {
        self.0
    }

    pub(crate) fn nil() -> Self {
        ChunkId(Uuid::nil())
    }
}
impl From<Uuid> for ChunkId {
    fn from(f: Uuid) -> Self {
        ChunkId(f)
    }
}
impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// チャンク内の割当済み領域を示すための構造体.
///
/// 利用者が受け取るのは領域の「ビュー」(オフセットと長さ)であって、
/// 領域の所有権ではない. ビューの有効期間は対応する`free`呼び出しまで.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Portion {
    /// 領域のチャンク内開始位置(バイト単位)
    pub offset: u32,

    /// 領域の長さ(バイト単位)
    pub len: u32,
}
impl Portion {
    /// 領域の終端位置を返す.
    ///
    /// **注意**: 領域は `[offset, end)` の半開区間である.
    pub fn end(&self) -> u32 {
        self.offset + self.len
    }
}

/// `Chunk`のビルダ.
#[derive(Debug, Clone)]
pub struct ChunkBuilder {
    page_size: PageSize,
    max_order: u8,
    instance_uuid: Option<Uuid>,
    metrics: MetricBuilder,
    logger: Logger,
}
impl ChunkBuilder {
    /// 新しい`ChunkBuilder`インスタンスを生成する.
    pub fn new(page_size: PageSize, max_order: u8) -> Self {
        ChunkBuilder {
            page_size,
            max_order,
            instance_uuid: None,
            metrics: MetricBuilder::new(),
            logger: Logger::root(Discard, o!()),
        }
    }

    /// チャンクインスタンスを識別するためのUUIDを設定する.
    ///
    /// 本メソッドが呼ばれていない場合は、ランダムなUUIDが割り当てられる.
    pub fn instance_uuid(&mut self, uuid: Uuid) -> &mut Self {
        self.instance_uuid = Some(uuid);
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// チャンク用のloggerを登録する.
    ///
    /// デフォルト値は`Logger::root(Discard, o!())`.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// 指定されたメモリ領域を管理するチャンクを生成する.
    ///
    /// 生成直後の木は全ノードが未割当の状態にある.
    ///
    /// # Errors
    ///
    /// 以下の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される:
    ///
    /// - `max_order`が`MAX_ORDER_LIMIT`を超えている
    /// - `page_size << max_order`が32bit幅に収まらない
    pub fn build<M>(&self, memory: M) -> Result<Chunk<M>> {
        track_assert!(
            self.max_order <= MAX_ORDER_LIMIT,
            ErrorKind::InvalidInput,
            "Too deep tree: max_order={}",
            self.max_order
        );
        track_assert!(
            u32::from(self.page_size.shift()) + u32::from(self.max_order) <= 31,
            ErrorKind::InvalidInput,
            "Too large chunk: page_size={}, max_order={}",
            self.page_size.as_u32(),
            self.max_order
        );

        let id = ChunkId(self.instance_uuid.unwrap_or_else(Uuid::new_v4));
        let chunk_size = self.page_size.as_u32() << self.max_order;
        let max_subpages = 1u32 << self.max_order;
        let logger = self.logger.new(o!("chunk" => id.to_string()));
        Ok(Chunk {
            id,
            memory,
            page_size: self.page_size,
            max_order: self.max_order,
            chunk_size,
            max_subpages,
            tree: BuddyTree::new(self.max_order),
            subpages: (0..max_subpages).map(|_| None).collect(),
            free_bytes: chunk_size,
            metrics: ChunkAllocatorMetrics::new(&self.metrics, u64::from(chunk_size)),
            logger,
        })
    }
}

/// 一つの固定長メモリ領域を管理するチャンク.
///
/// 型パラメータ`M`は管理対象のメモリ領域であり、チャンクはその由来
/// (ヒープ・オフヒープ等)には関知しない. 領域の獲得・解放は利用者の責務.
///
/// # Examples
///
/// ```
/// use pagepool::chunk::ChunkBuilder;
/// use pagepool::page::PageSize;
/// use pagepool::subpage::SubpagePools;
///
/// let mut pools = SubpagePools::new();
/// let page_size = PageSize::new(8192).unwrap();
/// let mut chunk = ChunkBuilder::new(page_size, 4).build(()).unwrap();
///
/// // ページ4枚分のランを確保する
/// let handle = chunk.allocate(8192 * 4, &mut pools).unwrap();
/// assert_eq!(chunk.portion(handle).offset, 0);
/// assert_eq!(chunk.free_bytes(), 8192 * 12);
///
/// chunk.free(handle, &mut pools);
/// assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()));
/// ```
#[derive(Debug)]
pub struct Chunk<M> {
    id: ChunkId,
    memory: M,
    page_size: PageSize,
    max_order: u8,
    chunk_size: u32,
    max_subpages: u32,
    tree: BuddyTree,
    subpages: Vec<Option<Subpage>>,
    free_bytes: u32,
    metrics: ChunkAllocatorMetrics,
    logger: Logger,
}
impl<M> Chunk<M> {
    /// 正規化済みサイズ`normalized_size`の領域を確保する.
    ///
    /// サイズの正規化は呼び出し側で行われていることが前提:
    /// ページサイズ以上の要求は2の冪乗、ページ未満の要求は
    /// 16の倍数であること.
    ///
    /// 空き領域が不足している場合には`None`が返される.
    /// これは高負荷時には頻繁に起きる正常な結果であり、
    /// チャンクの状態は変更されない(呼び出し側は別のチャンクを試せる).
    pub fn allocate(&mut self, normalized_size: u32, pools: &mut SubpagePools) -> Option<Handle> {
        let handle = if normalized_size >= self.page_size.as_u32() {
            self.allocate_run(normalized_size)
        } else {
            self.allocate_subpage(normalized_size, pools)
        };
        if handle.is_none() {
            self.metrics.nospace_failures.increment();
            debug!(self.logger, "no space left in chunk";
                   "normalized_size" => normalized_size, "free_bytes" => self.free_bytes);
        }
        handle
    }

    /// 空き容量のある既存サブページ(木の葉`node`)から一要素を確保する.
    ///
    /// サイズクラスのリスト経由でページを選んだプール管理層のための入口であり、
    /// 木や空きバイト数には影響しない.
    ///
    /// 対象ページが非活性の場合や空き要素が無い場合には`None`が返される.
    pub fn allocate_in_subpage(&mut self, node: u32, pools: &mut SubpagePools) -> Option<Handle> {
        let slot = self.subpage_index(node);
        let subpage = self.subpages[slot].as_mut()?;
        if !subpage.is_in_use() {
            return None;
        }
        let pool = pools.head_of(subpage.elem_size());
        let index = subpage.allocate(pool)?;
        self.metrics.count_elem_allocation();
        Some(Handle::Subpage { node, index })
    }

    /// `handle`に対応する割当を解放する.
    ///
    /// サブページ要素の解放では、同一ページ内に他の要素が残っている間
    /// (あるいはページがサイズクラスの最後のキャッシュである間)は
    /// ページ自体は木へ返却されない.
    ///
    /// # 事前条件
    ///
    /// - `handle`は「このチャンクが発行済み」かつ「未解放」であること
    ///   (二重解放や解放後の利用は検出されない)
    pub fn free(&mut self, handle: Handle, pools: &mut SubpagePools) {
        let node = match handle {
            Handle::Subpage { node, index } => {
                let slot = self.subpage_index(node);
                let subpage = self.subpages[slot]
                    .as_mut()
                    .expect("the handle must point to a live subpage");
                let pool = pools.head_of(subpage.elem_size());
                let outcome = subpage.free(pool, index);
                self.metrics.count_elem_release();
                if let FreeOutcome::StillInUse = outcome {
                    return;
                }
                self.metrics.count_page_reclamation(self.page_size.as_u32());
                debug!(self.logger, "page reclaimed into the buddy tree"; "node" => node);
                node
            }
            Handle::Run { node } => {
                self.metrics.count_run_release(self.run_length(node));
                node
            }
        };
        self.free_bytes += self.run_length(node);
        self.tree.free(node);
    }

    /// `handle`に対応する領域のビュー(オフセットと長さ)を返す.
    pub fn portion(&self, handle: Handle) -> Portion {
        match handle {
            Handle::Run { node } => {
                debug_assert!(self.tree.is_unusable(node));
                Portion {
                    offset: self.run_offset(node),
                    len: self.run_length(node),
                }
            }
            Handle::Subpage { node, index } => {
                let slot = self.subpage_index(node);
                let subpage = self.subpages[slot]
                    .as_ref()
                    .expect("the handle must point to a live subpage");
                debug_assert!(subpage.is_in_use());
                debug_assert!(index < subpage.max_elems());
                Portion {
                    offset: self.run_offset(node) + index * subpage.elem_size(),
                    len: subpage.elem_size(),
                }
            }
        }
    }

    /// チャンク内の未割当バイト数を返す.
    pub fn free_bytes(&self) -> u64 {
        u64::from(self.free_bytes)
    }

    /// チャンクの使用率をパーセント単位で返す.
    ///
    /// 完全に空のチャンクは`0`を、空きが残り1%未満のチャンクは
    /// (100へ丸めずに)`99`を報告する.
    pub fn usage(&self) -> u8 {
        if self.free_bytes == 0 {
            return 100;
        }
        let free_percentage =
            (u64::from(self.free_bytes) * 100 / u64::from(self.chunk_size)) as u8;
        if free_percentage == 0 {
            return 99;
        }
        100 - free_percentage
    }

    /// チャンクの識別子を返す.
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// チャンクの領域長(バイト単位)を返す.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// チャンクのページサイズを返す.
    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    /// 木の深さ(葉の数の対数)を返す.
    pub fn max_order(&self) -> u8 {
        self.max_order
    }

    /// チャンクアロケータ用のメトリクスを返す.
    pub fn metrics(&self) -> &ChunkAllocatorMetrics {
        &self.metrics
    }

    /// 管理対象のメモリ領域への参照を返す.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// 管理対象のメモリ領域への可変参照を返す.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// チャンクを解体して、管理対象のメモリ領域を返す.
    pub fn into_memory(self) -> M {
        self.memory
    }

    fn allocate_run(&mut self, normalized_size: u32) -> Option<Handle> {
        debug_assert!(normalized_size.is_power_of_two());
        if normalized_size > self.chunk_size {
            return None;
        }
        let d = self.max_order - (log2(normalized_size) - self.page_size.shift());
        let node = self.tree.allocate(d)?;
        let len = self.run_length(node);
        self.free_bytes -= len;
        self.metrics.count_run_allocation(len);
        Some(Handle::Run { node })
    }

    fn allocate_subpage(&mut self, elem_size: u32, pools: &mut SubpagePools) -> Option<Handle> {
        debug_assert!(elem_size >= Subpage::MIN_ELEM_SIZE);
        debug_assert_eq!(elem_size % Subpage::MIN_ELEM_SIZE, 0);
        let pool = pools.head_of(elem_size);

        // このチャンクに空き容量のある同クラスのサブページが既にあるなら、
        // 新しいページは切り出さずにそこから割り当てる
        let id = self.id;
        if let Some(key) = pool.iter().find(|k| k.chunk == id) {
            return self.allocate_from_listed(key.node, pool);
        }

        let node = self.tree.allocate(self.max_order)?;
        let page_size = self.page_size.as_u32();
        self.free_bytes -= page_size;
        self.metrics.count_page_slice(page_size);

        let page_offset = self.run_offset(node);
        let slot = self.subpage_index(node);
        if self.subpages[slot].is_none() {
            self.subpages[slot] = Some(Subpage::new(self.id, node, page_offset, self.page_size));
        }
        let subpage = self.subpages[slot].as_mut().expect("Never fails");
        subpage.init(pool, elem_size);
        let index = subpage
            .allocate(pool)
            .expect("a freshly initialized subpage has a free element");
        self.metrics.count_elem_allocation();
        debug!(self.logger, "page sliced for a size class";
               "node" => node, "elem_size" => elem_size);
        Some(Handle::Subpage { node, index })
    }

    fn allocate_from_listed(&mut self, node: u32, pool: &mut SubpagePool) -> Option<Handle> {
        let slot = self.subpage_index(node);
        let subpage = self.subpages[slot]
            .as_mut()
            .expect("listed subpages are always materialized");
        let index = subpage.allocate(pool)?;
        self.metrics.count_elem_allocation();
        Some(Handle::Subpage { node, index })
    }

    // ノードが担当する領域の長さ(バイト単位).
    fn run_length(&self, node: u32) -> u32 {
        self.chunk_size >> self.tree.depth_of(node)
    }

    // ノードが担当する領域のチャンク内オフセット(バイト単位).
    //
    // 深さdの中でのノードの左からの位置は、番号の下位dビットそのもの.
    fn run_offset(&self, node: u32) -> u32 {
        let shift = node ^ (1 << self.tree.depth_of(node));
        shift * self.run_length(node)
    }

    // 葉のノード番号を、最上位ビットを落としてページ配列の添字に変換する.
    fn subpage_index(&self, node: u32) -> usize {
        debug_assert_eq!(self.tree.depth_of(node), self.max_order);
        (node ^ self.max_subpages) as usize
    }
}

/// 通常のプーリング閾値を超えた要求のための、木を持たない退化したチャンク.
///
/// 領域全体が一つの割当として扱われ(単発)、常に「全て割当済み」として報告される.
/// 解放は、このインスタンスを破棄して領域を返却することに等しい.
#[derive(Debug)]
pub struct UnpooledChunk<M> {
    id: ChunkId,
    memory: M,
    size: u32,
}
impl<M> UnpooledChunk<M> {
    /// 指定されたメモリ領域を包む`UnpooledChunk`インスタンスを生成する.
    pub fn new(memory: M, size: u32) -> Self {
        UnpooledChunk {
            id: ChunkId(Uuid::new_v4()),
            memory,
            size,
        }
    }

    /// チャンクの識別子を返す.
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// チャンクの領域長(バイト単位)を返す.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// チャンク内の未割当バイト数を返す(常に`0`).
    pub fn free_bytes(&self) -> u64 {
        0
    }

    /// チャンクの使用率をパーセント単位で返す(常に`100`).
    pub fn usage(&self) -> u8 {
        100
    }

    /// 管理対象のメモリ領域への参照を返す.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// 管理対象のメモリ領域への可変参照を返す.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// チャンクを解体して、管理対象のメモリ領域を返す.
    pub fn into_memory(self) -> M {
        self.memory
    }
}

fn log2(v: u32) -> u8 {
    debug_assert_ne!(v, 0);
    (31 - v.leading_zeros()) as u8
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::page::PageSize;
    use crate::subpage::SubpagePools;

    fn chunk(page_size: u32, max_order: u8) -> Result<Chunk<()>> {
        let page_size = track!(PageSize::new(page_size))?;
        track!(ChunkBuilder::new(page_size, max_order).build(()))
    }

    fn portion(offset: u32, len: u32) -> Portion {
        Portion { offset, len }
    }

    #[test]
    fn it_works() -> TestResult {
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(4096, 2))?;
        assert_eq!(chunk.chunk_size(), 16384);
        assert_eq!(chunk.usage(), 0);

        let h0 = chunk.allocate(8192, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h0), portion(0, 8192));

        let h1 = chunk.allocate(4096, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h1), portion(8192, 4096));

        assert_eq!(chunk.allocate(8192, &mut pools), None);

        let h2 = chunk.allocate(4096, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h2), portion(12288, 4096));
        assert_eq!(chunk.free_bytes(), 0);
        assert_eq!(chunk.usage(), 100);

        chunk.free(h0, &mut pools);
        assert_eq!(chunk.free_bytes(), 8192);

        // 左端優先なので、解放された先頭領域が再利用される
        let h3 = chunk.allocate(4096, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h3), portion(0, 4096));

        let m = chunk.metrics();
        assert_eq!(m.allocated_runs(), 4);
        assert_eq!(m.released_runs(), 1);
        assert_eq!(m.nospace_failures(), 1);
        assert_eq!(
            m.usage_bytes(),
            u64::from(chunk.chunk_size()) - chunk.free_bytes()
        );
        Ok(())
    }

    #[test]
    fn run_allocation_and_merge() -> TestResult {
        // 8KiBページ、深さ4(チャンクは128KiB)
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(8192, 4))?;

        let h32k = chunk.allocate(32 * 1024, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h32k), portion(0, 32 * 1024));

        let h16k = chunk.allocate(16 * 1024, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h16k), portion(32 * 1024, 16 * 1024));

        chunk.free(h32k, &mut pools);
        assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()) - 16 * 1024);

        // 解放された32KiB分は一つのランとしてマージされ、先頭から再確保できる
        let h = chunk.allocate(32 * 1024, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h), portion(0, 32 * 1024));

        // 既存の16KiB割当はそのまま残っている
        assert_eq!(chunk.portion(h16k), portion(32 * 1024, 16 * 1024));
        Ok(())
    }

    #[test]
    fn subpage_allocations_share_a_page() -> TestResult {
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(8192, 2))?;

        // 一つ目の要求で新しいページが切り出される
        let h0 = chunk.allocate(64, &mut pools).expect("Never fails");
        assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()) - 8192);

        // 二つ目の要求は同じページから満たされ、空きバイト数は変わらない
        let h1 = chunk.allocate(64, &mut pools).expect("Never fails");
        assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()) - 8192);

        assert_eq!(h0.node(), h1.node());
        assert_eq!(chunk.portion(h0), portion(0, 64));
        assert_eq!(chunk.portion(h1), portion(64, 64));

        chunk.free(h0, &mut pools);
        chunk.free(h1, &mut pools);

        // 完全に空になっても、サイズクラス最後の一枚はキャッシュとして残る
        assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()) - 8192);

        // キャッシュされたページからは、リスト経由の入口で割当を継続できる
        let h2 = chunk
            .allocate_in_subpage(h0.node(), &mut pools)
            .expect("Never fails");
        assert_eq!(h2.node(), h0.node());
        Ok(())
    }

    #[test]
    fn exhaustion_is_not_fatal() -> TestResult {
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(4096, 2))?;

        let mut handles = Vec::new();
        for i in 0..4 {
            let h = chunk.allocate(4096, &mut pools).expect("Never fails");
            assert_eq!(chunk.portion(h), portion(i * 4096, 4096));
            handles.push(h);
        }

        // 5回目は失敗するが、エラーでもパニックでもない
        assert_eq!(chunk.allocate(4096, &mut pools), None);
        assert_eq!(chunk.free_bytes(), 0);

        // 一つ解放すれば、ちょうど一ページ分だけ確保可能になる
        chunk.free(handles[2], &mut pools);
        let h = chunk.allocate(4096, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h), portion(2 * 4096, 4096));
        assert_eq!(chunk.allocate(4096, &mut pools), None);
        Ok(())
    }

    #[test]
    fn portions_are_disjoint_until_exhaustion() -> TestResult {
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(4096, 3))?;

        let mut portions = Vec::new();
        for &size in &[8192, 4096, 16384, 4096] {
            let h = chunk.allocate(size, &mut pools).expect("Never fails");
            portions.push(chunk.portion(h));
        }
        assert_eq!(chunk.free_bytes(), 0);
        assert_eq!(chunk.allocate(4096, &mut pools), None);

        portions.sort();
        for pair in portions.windows(2) {
            assert!(pair[0].end() <= pair[1].offset, "{:?}", pair);
        }
        assert_eq!(
            portions.iter().map(|p| u64::from(p.len)).sum::<u64>(),
            u64::from(chunk.chunk_size())
        );
        Ok(())
    }

    #[test]
    fn conservation_of_bytes() -> TestResult {
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(4096, 3))?;

        // 確保と解放をどう交差させても、
        // 「空きバイト数 + 生存中の割当サイズの総和 = チャンクサイズ」が崩れないこと
        let mut live: Vec<(Handle, u64)> = Vec::new();
        let sizes = [8192, 4096, 4096, 16384, 4096, 8192];
        for (i, &size) in sizes.iter().enumerate() {
            if let Some(h) = chunk.allocate(size, &mut pools) {
                live.push((h, u64::from(size)));
            }
            if i % 2 == 1 {
                let (h, _) = live.remove(0);
                chunk.free(h, &mut pools);
            }
            let in_use: u64 = live.iter().map(|&(_, len)| len).sum();
            assert_eq!(chunk.free_bytes() + in_use, u64::from(chunk.chunk_size()));
        }
        for (h, _) in live {
            chunk.free(h, &mut pools);
        }
        assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()));
        Ok(())
    }

    #[test]
    fn round_trip_restores_the_tree() -> TestResult {
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(4096, 3))?;

        for &size in &[4096, 8192, 16384, 32768] {
            let h = chunk.allocate(size, &mut pools).expect("Never fails");
            chunk.free(h, &mut pools);
            assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()));

            // 木が完全にマージされていれば、チャンク全域のランが確保できる
            let whole = chunk.allocate(32768, &mut pools).expect("Never fails");
            assert_eq!(chunk.portion(whole), portion(0, 32768));
            chunk.free(whole, &mut pools);
        }
        Ok(())
    }

    #[test]
    fn subpage_reuse_requires_a_trip_through_the_tree() -> TestResult {
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(4096, 2))?;

        // 一ページ目(64バイト x 64要素)を使い切る
        let mut handles = Vec::new();
        for _ in 0..64 {
            handles.push(chunk.allocate(64, &mut pools).expect("Never fails"));
        }
        let first_page = handles[0].node();
        assert!(handles.iter().all(|h| h.node() == first_page));
        assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()) - 4096);

        // 65個目で二ページ目が切り出される
        let h64 = chunk.allocate(64, &mut pools).expect("Never fails");
        assert_ne!(h64.node(), first_page);
        assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()) - 8192);

        // 一ページ目の要素を全て解放すると、同クラスに二ページ目が残っているので
        // 一ページ目は木へ回収される
        for h in handles {
            chunk.free(h, &mut pools);
        }
        assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()) - 4096);

        // 回収済みの葉は、別の要素サイズ用として再利用できる
        // (要素が生きている間は要素サイズが変わらないことの裏返し)
        let h128 = chunk.allocate(128, &mut pools).expect("Never fails");
        assert_eq!(h128.node(), first_page);
        assert_eq!(chunk.portion(h128), portion(0, 128));
        Ok(())
    }

    #[test]
    fn deep_fragmentation_then_coalescing() -> TestResult {
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(4096, 4))?;

        // 葉を使い切る
        let mut leaves = Vec::new();
        loop {
            match chunk.allocate(4096, &mut pools) {
                Some(h) => leaves.push(h),
                None => break,
            }
        }
        assert_eq!(leaves.len(), 16);
        assert_eq!(chunk.free_bytes(), 0);

        // 先頭のバディ一組を解放すると、8KiBのランとして確保し直せる
        chunk.free(leaves[0], &mut pools);
        chunk.free(leaves[1], &mut pools);
        let h8k = chunk.allocate(8192, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h8k), portion(0, 8192));

        // 更に隣のバディも解放すると、二段階のマージを経て16KiBが確保できる
        chunk.free(h8k, &mut pools);
        chunk.free(leaves[2], &mut pools);
        chunk.free(leaves[3], &mut pools);
        let h16k = chunk.allocate(16384, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(h16k), portion(0, 16384));

        // 全てを解放すれば、根まで統合されてチャンク全域が空く
        chunk.free(h16k, &mut pools);
        for h in leaves.drain(4..).rev() {
            chunk.free(h, &mut pools);
        }
        assert_eq!(chunk.free_bytes(), u64::from(chunk.chunk_size()));
        let whole = chunk.allocate(65536, &mut pools).expect("Never fails");
        assert_eq!(chunk.portion(whole), portion(0, 65536));
        Ok(())
    }

    #[test]
    fn usage_reporting_is_clamped() -> TestResult {
        let mut pools = SubpagePools::new();

        // 完全に空のチャンクは0%(100 - 100ではなく)
        let mut chunk = track!(chunk(4096, 7))?;
        assert_eq!(chunk.usage(), 0);

        // 空きが1%未満のチャンクは(100へ丸めずに)99%
        let mut handles = Vec::new();
        for _ in 0..127 {
            handles.push(chunk.allocate(4096, &mut pools).expect("Never fails"));
        }
        assert_eq!(chunk.free_bytes(), 4096);
        assert_eq!(chunk.usage(), 99);

        // 空きゼロで初めて100%
        handles.push(chunk.allocate(4096, &mut pools).expect("Never fails"));
        assert_eq!(chunk.usage(), 100);
        Ok(())
    }

    #[test]
    fn builder_rejects_bad_configurations() -> TestResult {
        let page_size = track!(PageSize::new(4096))?;
        assert!(ChunkBuilder::new(page_size, MAX_ORDER_LIMIT + 1)
            .build(())
            .is_err());

        let page_size = track!(PageSize::new(1 << 20))?;
        assert!(ChunkBuilder::new(page_size, 14).build(()).is_err());
        assert!(ChunkBuilder::new(page_size, 11).build(()).is_ok());
        Ok(())
    }

    #[test]
    fn handle_round_trips_through_packed_form() -> TestResult {
        let mut pools = SubpagePools::new();
        let mut chunk = track!(chunk(4096, 2))?;

        let h0 = chunk.allocate(8192, &mut pools).expect("Never fails");
        let h1 = chunk.allocate(32, &mut pools).expect("Never fails");
        for &h in &[h0, h1] {
            let packed = HandleU64::from(h);
            assert_eq!(Handle::from(packed), h);
        }

        // 圧縮表現を経由して解放しても挙動は同じ
        chunk.free(Handle::from(HandleU64::from(h0)), &mut pools);
        chunk.free(Handle::from(HandleU64::from(h1)), &mut pools);
        Ok(())
    }

    #[test]
    fn unpooled_chunk_is_always_fully_allocated() {
        let chunk = UnpooledChunk::new((), 3 * 1024 * 1024);
        assert_eq!(chunk.size(), 3 * 1024 * 1024);
        assert_eq!(chunk.free_bytes(), 0);
        assert_eq!(chunk.usage(), 100);
    }
}
