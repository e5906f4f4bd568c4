//! 统计聚合：按注册顺序拼接各协议自报的统计片段。

use crate::registry::ProtocolRegistry;

impl ProtocolRegistry {
    /// 把每个协议的统计写入 `buf`，返回总字节数。
    ///
    /// # 教案式注释
    /// - **逻辑 (How)**：按槽位顺序请求协议写入剩余空间，写游标前移、剩余容量缩减；
    ///   剩余容量耗尽即停止；
    /// - **契约 (What)**：`buf` 为 `None` 时不写入，只累计各协议报告的所需长度，
    ///   用于先探测总大小再分配缓冲区；
    /// - **注意事项 (Trade-offs)**：协议报告的长度若超过剩余空间，游标按剩余空间截断，
    ///   返回值仍累加协议报告的长度。
    pub fn aggregate_statistics(&self, mut buf: Option<&mut [u8]>, sync: bool) -> usize {
        let mut total = 0;

        for slot in self.iter() {
            match buf.take() {
                None => {
                    total += slot.instance().write_statistics(None, sync);
                }
                Some(remaining) => {
                    if remaining.is_empty() {
                        break;
                    }
                    let written = slot
                        .instance()
                        .write_statistics(Some(&mut *remaining), sync);
                    total += written;
                    let advance = written.min(remaining.len());
                    buf = Some(&mut remaining[advance..]);
                }
            }
        }

        total
    }
}
