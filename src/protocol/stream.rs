//! OpenAI chat/completions SSE -> Anthropic messages SSE
//!
//! OpenAI 输入示例:
//! ```text
//! data: {"id":"chatcmpl-123","choices":[{"delta":{"role":"assistant","content":""},"finish_reason":null}]}
//! data: {"id":"chatcmpl-123","choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}
//! data: {"id":"chatcmpl-123","choices":[{"delta":{},"finish_reason":"stop"}]}
//! data: [DONE]
//! ```
//!
//! Anthropic 输出示例:
//! ```text
//! event: message_start
//! data: {"type":"message_start","message":{...}}
//!
//! event: content_block_start
//! data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}
//!
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}
//!
//! event: content_block_stop
//! data: {"type":"content_block_stop","index":0}
//!
//! event: message_delta
//! data: {"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{...}}
//!
//! event: message_stop
//! data: {"type":"message_stop"}
//! ```

use crate::error::Result;
use crate::models::{map_finish_reason, Usage, DEFAULT_STOP_REASON};
use crate::protocol::anthropic::{
    AnthropicResponse, BlockDelta, MessageDelta, ResponseBlock, StreamEvent,
};
use crate::protocol::openai::{StreamChunk, ToolCallDelta};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};
use uuid::Uuid;

const DONE_MARKER: &str = "[DONE]";

// ================== SSE 行解析 ==================

/// 按行切分跨 chunk 的 SSE 字节流
///
/// 先按 `\n` 切分再解码，多字节字符不会被 chunk 边界截断。
#[derive(Default)]
pub struct SseLineDecoder {
    buffer: BytesMut,
}

impl SseLineDecoder {
    /// 追加数据，返回所有完整的非空行
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// 流结束时取出没有换行结尾的残余数据
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        let line = String::from_utf8_lossy(&rest).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// 取出 `data:` 行的内容，其他字段（event、id、注释）返回 None
fn data_field(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// 生成 SSE 格式的字符串
fn format_sse(event: &str, data: &str) -> String {
    format!("event: {}\ndata: {}\n\n", event, data)
}

/// 将一组事件编码为一个输出 chunk
pub fn encode_events(events: &[StreamEvent]) -> Bytes {
    let mut out = String::new();
    for event in events {
        match serde_json::to_string(event) {
            Ok(data) => out.push_str(&format_sse(event.event_name(), &data)),
            Err(e) => error!("Failed to encode {} event: {}", event.event_name(), e),
        }
    }
    Bytes::from(out)
}

// ================== 状态机 ==================

#[derive(Debug, Clone)]
enum BlockKind {
    Text,
    ToolUse { id: String, name: String },
}

/// 当前打开的块及其源格式 index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(usize),
    Tool(usize),
}

impl OpenBlock {
    fn index(self) -> usize {
        match self {
            OpenBlock::Text(index) | OpenBlock::Tool(index) => index,
        }
    }
}

/// 还没拿到函数名的 tool call，参数片段先缓存
#[derive(Debug, Default)]
struct PendingTool {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// 一次流式响应的转换状态，只属于当前这一条流
pub struct StreamTranscoder {
    message_id: String,
    model: String,
    started: bool,
    finished: bool,
    /// 已打开过的块数量，即下一个块的 index
    block_count: usize,
    /// 上游 tool_call index -> 源格式块 index
    tool_blocks: BTreeMap<u32, usize>,
    pending_tools: BTreeMap<u32, PendingTool>,
    open_block: Option<OpenBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

impl StreamTranscoder {
    pub fn new(original_model: impl Into<String>) -> Self {
        Self {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            model: original_model.into(),
            started: false,
            finished: false,
            block_count: 0,
            tool_blocks: BTreeMap::new(),
            pending_tools: BTreeMap::new(),
            open_block: None,
            stop_reason: None,
            usage: Usage::default(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 第一次调用时产生 message_start
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        vec![StreamEvent::MessageStart {
            message: AnthropicResponse {
                id: self.message_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }]
    }

    /// 处理一行 SSE 文本
    pub fn process_line(&mut self, line: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let Some(data) = data_field(line) else {
            return Vec::new();
        };

        if data == DONE_MARKER {
            return self.finish();
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => self.process_chunk(&chunk),
            Err(e) => {
                warn!("Skipping unparseable stream chunk: {} ({})", e, data);
                Vec::new()
            }
        }
    }

    /// 处理一个已解析的 chunk，只看第一个 choice
    pub fn process_chunk(&mut self, chunk: &StreamChunk) -> Vec<StreamEvent> {
        let mut events = self.start();

        if let Some(usage) = chunk.usage {
            self.usage = Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            };
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            self.push_text(text, &mut events);
        }

        for call in choice.delta.tool_calls.iter().flatten() {
            self.push_tool_call(call, &mut events);
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            self.stop_reason = Some(map_finish_reason(reason));
        }

        events
    }

    fn push_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        let index = match self.open_block {
            Some(OpenBlock::Text(index)) => index,
            _ => {
                self.flush_pending_tools(events);
                self.open(BlockKind::Text, events)
            }
        };

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn push_tool_call(&mut self, call: &ToolCallDelta, events: &mut Vec<StreamEvent>) {
        let function = call.function.as_ref();
        let arguments = function
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or_default();

        let opened = self.tool_blocks.get(&call.index).copied();
        match opened {
            Some(index) if self.open_block == Some(OpenBlock::Tool(index)) => {
                Self::push_arguments(index, arguments, events);
            }
            Some(index) => {
                warn!(
                    "Dropping arguments for closed tool call {} (block {})",
                    call.index, index
                );
            }
            None => {
                // id 和 name 取自第一个带有它们的 delta，拿到 name 之前不打开块
                let pending = self.pending_tools.entry(call.index).or_default();
                if pending.id.is_none() {
                    pending.id = call.id.clone().filter(|id| !id.is_empty());
                }
                if pending.name.is_none() {
                    pending.name = function
                        .and_then(|f| f.name.clone())
                        .filter(|name| !name.is_empty());
                }
                pending.arguments.push_str(arguments);

                if pending.name.is_some() {
                    if let Some(tool) = self.pending_tools.remove(&call.index) {
                        self.flush_pending_tools(events);
                        self.open_tool(call.index, tool, events);
                    }
                }
            }
        }
    }

    fn push_arguments(index: usize, arguments: &str, events: &mut Vec<StreamEvent>) {
        if arguments.is_empty() {
            return;
        }
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::InputJsonDelta {
                partial_json: arguments.to_string(),
            },
        });
    }

    /// 打开 tool_use 块并输出已缓存的参数；缺失的 id 自动生成，缺失的 name 为空
    fn open_tool(&mut self, tool_index: u32, tool: PendingTool, events: &mut Vec<StreamEvent>) {
        let kind = BlockKind::ToolUse {
            id: tool
                .id
                .unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4().simple())),
            name: tool.name.unwrap_or_default(),
        };
        let index = self.open(kind, events);
        self.tool_blocks.insert(tool_index, index);
        Self::push_arguments(index, &tool.arguments, events);
    }

    /// 其他块要打开或流结束时，还没拿到 name 的 tool call 按现有信息打开
    fn flush_pending_tools(&mut self, events: &mut Vec<StreamEvent>) {
        for (tool_index, tool) in std::mem::take(&mut self.pending_tools) {
            warn!("Tool call {} finished without a function name", tool_index);
            self.open_tool(tool_index, tool, events);
        }
    }

    /// 关闭当前块并打开新块，返回新块的 index
    fn open(&mut self, kind: BlockKind, events: &mut Vec<StreamEvent>) -> usize {
        self.close_open_block(events);

        let index = self.block_count;
        self.block_count += 1;

        let (content_block, open) = match kind {
            BlockKind::Text => (
                ResponseBlock::Text {
                    text: String::new(),
                },
                OpenBlock::Text(index),
            ),
            BlockKind::ToolUse { id, name } => (
                ResponseBlock::ToolUse {
                    id,
                    name,
                    input: Value::Object(Default::default()),
                },
                OpenBlock::Tool(index),
            ),
        };

        self.open_block = Some(open);
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block,
        });
        index
    }

    fn close_open_block(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(open) = self.open_block.take() {
            events.push(StreamEvent::ContentBlockStop {
                index: open.index(),
            });
        }
    }

    /// 结束消息：关闭打开的块，产生 message_delta 和 message_stop
    ///
    /// 无论是收到 [DONE] 还是上游流提前结束都会调用，重复调用无副作用。
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = self.start();
        self.flush_pending_tools(&mut events);
        self.close_open_block(&mut events);

        let stop_reason = self
            .stop_reason
            .clone()
            .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());

        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason,
                stop_sequence: None,
            },
            usage: self.usage,
        });
        events.push(StreamEvent::MessageStop);
        self.finished = true;

        debug!(
            "Stream {} finished with {} content blocks",
            self.message_id, self.block_count
        );
        events
    }
}

/// 将上游字节流转换为 Anthropic SSE 字节流
///
/// 每个上游 chunk 处理完立即输出，不等待整条流；上游出错或提前结束时
/// 仍会补齐 content_block_stop / message_delta / message_stop。
/// 返回的流持有上游流，调用方断开后随之释放。
pub fn transcode_stream(
    upstream: impl Stream<Item = Result<Bytes>> + Send + 'static,
    mut transcoder: StreamTranscoder,
) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
    async_stream::stream! {
        let mut decoder = SseLineDecoder::default();
        futures::pin_mut!(upstream);

        while let Some(chunk_result) = upstream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    let mut events = transcoder.start();
                    for line in decoder.push(&chunk) {
                        events.extend(transcoder.process_line(&line));
                        if transcoder.is_finished() {
                            break;
                        }
                    }
                    if !events.is_empty() {
                        yield Ok(encode_events(&events));
                    }
                    if transcoder.is_finished() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Upstream stream failed for {}: {}", transcoder.message_id(), e);
                    break;
                }
            }
        }

        // 上游没有发送 [DONE] 时补齐结束事件
        let mut events = Vec::new();
        if !transcoder.is_finished() {
            if let Some(line) = decoder.finish() {
                events.extend(transcoder.process_line(&line));
            }
            events.extend(transcoder.finish());
        }
        if !events.is_empty() {
            yield Ok(encode_events(&events));
        }
    }
}
