//! Page scripts evaluated through `Runtime.evaluate`.
//!
//! Selectors here track DeepSeek's markup and change with it. Every script
//! returns a plain JSON object so results come back by value.

use serde_json::Value;

fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

const COMPOSER_SELECTORS: &str = r#"["textarea","[contenteditable=\"true\"]","[role=\"textbox\"]","input[type=\"text\"]",".ProseMirror","div[aria-label]","div[placeholder]","[data-slate-editor]","[data-testid*=\"editor\"]","[data-lexical-editor]"]"#;

/// Fill the composer with `text` and submit it.
///
/// Returns `{ ok, selector?, tag?, msg? }`.
pub fn inject_prompt(text: &str) -> String {
    let s = js_string(text);
    format!(
        r#"(() => {{
  const sels = {COMPOSER_SELECTORS};
  let el = null, used = null;
  for (const q of sels) {{ const e = document.querySelector(q); if (e) {{ el = e; used = q; break }} }}
  if (!el) return {{ ok: false, msg: 'no input' }};
  const tag = (el.tagName || '').toLowerCase();
  el.focus();
  if (tag === 'textarea' || (tag === 'input' && el.type === 'text')) {{
    const proto = tag === 'textarea' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
    const desc = Object.getOwnPropertyDescriptor(proto, 'value');
    if (desc && desc.set) desc.set.call(el, {s}); else el.value = {s};
  }} else {{
    el.textContent = {s};
  }}
  try {{ el.dispatchEvent(new InputEvent('input', {{ bubbles: true, data: {s}, inputType: 'insertText' }})) }} catch (e) {{}}
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  const container = el.closest('form') || el.parentElement || document;
  const btnSels = ['button[type="submit"]', 'button[aria-label*="发送"]', 'button[aria-label*="Send"]',
    '[role="button"][aria-label*="发送"]', '[role="button"][aria-label*="Send"]', '[data-testid*="send"]'];
  let btn = null;
  for (const q of btnSels) {{ btn = container.querySelector(q) || document.querySelector(q); if (btn) break }}
  if (btn) {{
    for (const type of ['pointerdown', 'mousedown', 'click', 'mouseup'])
      btn.dispatchEvent(new MouseEvent(type, {{ bubbles: true, cancelable: true }}));
  }} else {{
    const target = document.activeElement || el;
    target.dispatchEvent(new KeyboardEvent('keydown', {{ key: 'Enter', code: 'Enter', bubbles: true }}));
    target.dispatchEvent(new KeyboardEvent('keyup', {{ key: 'Enter', code: 'Enter', bubbles: true }}));
  }}
  return {{ ok: true, selector: used, tag: el.tagName }};
}})()"#
    )
}

/// Inspect the latest answer.
///
/// Returns `{ hasAnswer, isComplete, reason, content, contentLength }`.
pub const DETECT_ANSWER: &str = r#"(() => {
  const containers = [
    '[data-testid*="conversation-turn"]:last-child .prose', '[data-testid*="assistant-message"]',
    '.assistant-message', '.ai-response', '[data-role="assistant"]', '.message.assistant',
    '.chat-message.assistant', '.response-content', '.answer-content',
    'div[class*="message"]:last-child div[class*="content"]', '.prose:last-child',
    '.ds-markdown:last-of-type'
  ];
  let box = null;
  for (const q of containers) { const e = document.querySelector(q); if (e && e.textContent.trim().length > 0) { box = e; break } }
  if (!box) return { hasAnswer: false, isComplete: false, reason: 'no_answer_container', content: '', contentLength: 0 };
  const content = box.textContent.trim();
  const visible = q => { const e = document.querySelector(q); return !!(e && e.offsetParent !== null) };
  const typing = ['[data-testid*="typing"]', '.typing-indicator', '.loading-dots', '[class*="typing"]', '.animate-pulse'].some(visible);
  const done = ['[data-testid*="copy"]', 'button[aria-label*="copy"]', 'button[title*="复制"]', '.copy-button'].some(visible);
  const dangling = /[，。！？；：,!?;:]$|\.{3}$|\s+$/.test(content);
  const isComplete = !typing && content.length > 0 && (done || !dangling);
  return {
    hasAnswer: true,
    isComplete,
    reason: typing ? 'typing_in_progress' : content.length === 0 ? 'empty_content' : done ? 'has_completion_indicator' : 'content_stable',
    content: content.substring(0, 200),
    contentLength: content.length
  };
})()"#;

/// Click the element whose text matches `label`, preferring buttons.
///
/// Returns `{ ok, x?, y?, via? }`.
pub fn click_by_text(label: &str) -> String {
    let t = js_string(label);
    format!(
        r#"(() => {{
  const t = {t};
  const spans = Array.from(document.querySelectorAll('span'));
  let s = spans.find(x => (x.textContent || '').trim() === t) || spans.find(x => (x.textContent || '').trim().includes(t));
  if (!s) s = Array.from(document.querySelectorAll('*')).find(x => (x.textContent || '').trim().includes(t)) || null;
  const el = s ? (s.closest('button,[role="button"],a[role="button"],div[role="button"]') || s) : null;
  if (!el) return {{ ok: false }};
  try {{ el.scrollIntoView({{ block: 'center', inline: 'center' }}) }} catch (e) {{}}
  const r = el.getBoundingClientRect();
  if (r.width <= 0 || r.height <= 0) return {{ ok: false }};
  try {{ el.click() }} catch (e) {{}}
  return {{ ok: true, x: Math.round(r.left + r.width / 2), y: Math.round(r.top + r.height / 2), via: 'dom' }};
}})()"#
    )
}

/// Whether an empty composer is showing, i.e. a fresh chat is open.
pub const VERIFY_NEW_CHAT: &str = r#"(() => {
  const qs = ['textarea', '[contenteditable="true"]', '[role="textbox"]', 'input[type="text"]', '.ProseMirror'];
  let el = null;
  for (const q of qs) { const e = document.querySelector(q); if (e) { el = e; break } }
  if (!el) return { ok: false };
  const tag = (el.tagName || '').toLowerCase();
  const editable = tag === 'textarea' || (tag === 'input' && el.type === 'text') || !!el.isContentEditable;
  const val = (el.value !== undefined ? el.value : (el.textContent || '')).trim();
  const ph = el.getAttribute('placeholder') || '';
  return { ok: editable && val.length === 0 && /输入|消息|message|chat|send/i.test(ph), via: 'verify' };
})()"#;

const CHAT_ITEMS: &str = r#"'aside a[href*="/chat/"], a[href*="/chat/"], aside [role="listitem"], aside .chat-item, aside .conversation-item'"#;

pub const OPEN_SIDEBAR: &str = r#"(() => {
  const cands = ['button[aria-label*="Menu"]', 'button[aria-label*="菜单"]', 'button[aria-label*="侧边栏"]', '[data-testid*="sidebar"][role="button"]'];
  for (const sel of cands) { const b = document.querySelector(sel); if (b) { try { b.click() } catch (e) {} return { ok: true, selector: sel } } }
  return { ok: true };
})()"#;

/// Delete sidebar conversations one at a time.
///
/// Gives up after `max_attempts` deletions or three rounds without
/// progress. Returns `{ ok, deleted, remaining }`.
pub fn delete_chats(max_attempts: u32) -> String {
    let attempts = max_attempts.max(1);
    format!(
        r#"(() => {{
  const wait = ms => new Promise(r => setTimeout(r, ms));
  const findItems = () => Array.from(document.querySelectorAll({CHAT_ITEMS}));
  async function remove(item) {{
    try {{ item.scrollIntoView({{ block: 'center' }}) }} catch (e) {{}}
    const menu = item.querySelector('button[aria-label*="更多"], button[aria-label*="More"], [role="button"][aria-label*="更多"], [role="button"][aria-label*="More"]')
      || item.querySelector('button:has(svg), [role="button"]:has(svg)');
    if (!menu) return false;
    try {{ menu.click() }} catch (e) {{}}
    await wait(120);
    const cont = document.querySelector('div[role="menu"]') || document;
    const del = Array.from(cont.querySelectorAll('*')).find(x => /删除|Delete/i.test(x.textContent || ''));
    if (!del) return false;
    try {{ del.click() }} catch (e) {{}}
    await wait(160);
    const dlg = document.querySelector('div[role="dialog"]') || document;
    const conf = Array.from(dlg.querySelectorAll('button,[role="button"]')).find(x => /删除|确认|Delete|OK/i.test(x.textContent || ''));
    if (conf) {{ try {{ conf.click() }} catch (e) {{}} }}
    await wait(260);
    return true;
  }}
  async function run() {{
    let deleted = 0, left = {attempts}, previous = -1, stalled = 0;
    while (left-- > 0) {{
      const items = findItems();
      if (items.length === 0) break;
      stalled = items.length === previous ? stalled + 1 : 0;
      if (stalled >= 3) break;
      previous = items.length;
      if (await remove(items[0])) deleted++;
      await wait(2000);
    }}
    return {{ ok: true, deleted, remaining: findItems().length }};
  }}
  return run();
}})()"#
    )
}

pub fn verify_history_empty() -> String {
    format!(
        r#"(() => {{ const n = document.querySelectorAll({CHAT_ITEMS}).length; return {{ ok: n === 0, remaining: n }} }})()"#
    )
}

pub const OUTER_HTML: &str = "document.documentElement.outerHTML";

/// Inventory of every non-empty link on the page.
///
/// Returns `{ totalLinks, links: [{ text, href, title, className, id, isVisible, rect }] }`.
pub const LINK_INVENTORY: &str = r#"(() => {
  const links = Array.from(document.querySelectorAll('a')).map(el => {
    const r = el.getBoundingClientRect();
    return {
      text: (el.innerText || '').trim(), href: el.href, title: el.title || '',
      className: typeof el.className === 'string' ? el.className : '', id: el.id,
      isVisible: el.offsetWidth > 0 && el.offsetHeight > 0,
      rect: { top: r.top, left: r.left, width: r.width, height: r.height }
    };
  }).filter(l => l.text.length > 0);
  return { totalLinks: links.length, links };
})()"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_prompt_escapes_text() {
        let script = inject_prompt("say \"hi\"\n</script>");
        assert!(script.contains(r#""say \"hi\"\n</script>""#));
        assert!(script.starts_with("(() => {"));
        assert!(script.trim_end().ends_with("})()"));
    }

    #[test]
    fn test_click_by_text_embeds_label() {
        let script = click_by_text("开启新对话");
        assert!(script.contains(r#"const t = "开启新对话";"#));
    }

    #[test]
    fn test_delete_chats_clamps_attempts() {
        assert!(delete_chats(0).contains("left = 1,"));
        assert!(delete_chats(25).contains("left = 25,"));
    }

    #[test]
    fn test_scripts_share_chat_item_selector() {
        assert!(verify_history_empty().contains("aside .conversation-item"));
        assert!(delete_chats(3).contains("aside .conversation-item"));
    }
}
