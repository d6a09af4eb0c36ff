//! Embedded HUD page served at `/`.

pub(crate) const HUD_INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>scanlens</title>
<style>
  body { margin: 0; background: #111; color: #ddd; font-family: monospace; }
  header { padding: 8px 16px; display: flex; gap: 16px; align-items: center; }
  header h1 { font-size: 16px; margin: 0; color: #8f8; }
  main { display: flex; gap: 16px; padding: 0 16px 16px; }
  img { max-width: 70vw; border: 1px solid #333; }
  aside { flex: 1; }
  ul { list-style: none; padding: 0; margin: 0; }
  li { padding: 4px 0; border-bottom: 1px solid #222; }
  .code { color: #8f8; }
  .product { color: #ff8; }
  button { background: #222; color: #8f8; border: 1px solid #444; padding: 6px 12px; cursor: pointer; }
  a { color: #88f; }
</style>
</head>
<body>
<header>
  <h1>scanlens</h1>
  <button id="rescan">rescan</button>
  <a href="/history">history</a>
  <a href="/scans">scans.json</a>
  <a href="/metrics">metrics</a>
</header>
<main>
  <img src="/stream.mjpg" alt="live preview">
  <aside>
    <ul id="scans"><li>waiting for scans...</li></ul>
  </aside>
</main>
<script>
  const list = document.getElementById('scans');
  const source = new EventSource('/stream_scans');
  source.onmessage = (event) => {
    const payload = JSON.parse(event.data);
    if (!payload.scans.length) return;
    list.innerHTML = '';
    for (const scan of payload.scans) {
      const item = document.createElement('li');
      let text = `<span class="code">${scan.symbology} ${scan.code}</span>`;
      if (payload.product && payload.product.code === scan.code && payload.product.name) {
        text += ` <span class="product">${payload.product.name}</span>`;
      }
      item.innerHTML = text;
      list.prepend(item);
    }
  };
  document.getElementById('rescan').onclick = () =>
    fetch('/rescan', { method: 'POST' });
</script>
</body>
</html>
"#;
