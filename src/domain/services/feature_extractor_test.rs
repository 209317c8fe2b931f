// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::*;

fn extractor() -> FeatureExtractor {
    FeatureExtractor::new(4).unwrap()
}

fn base() -> Url {
    Url::parse("https://shop.example.com/").unwrap()
}

fn html(content: &str) -> PageContent {
    PageContent::Html(content.to_string())
}

#[test]
fn test_nav_headings_and_hero_are_extracted() {
    let page = html(
        r#"
        <html><body>
            <header>
                <nav>
                    <a href="/bras">  Bras </a>
                    <a href="/panties">Panties</a>
                    <a href="/sleep">Sleepwear
                        &amp; Loungewear</a>
                    <a href="/x">X</a>
                    <a href="/bras">BRAS</a>
                </nav>
            </header>
            <section class="hero-section">
                <h2>New Lace Collection</h2>
                <p>Soft support for every day</p>
                <a class="btn" href="/shop">Shop now</a>
            </section>
            <h1>Intimates for everyone</h1>
            <h3>Abc</h3>
        </body></html>
    "#,
    );

    let bundle = extractor().extract(&page, Some(&base()), &[]);

    assert_eq!(
        bundle.nav_items(),
        &["bras", "panties", "sleepwear & loungewear"]
    );
    assert_eq!(
        bundle.headings(),
        &["new lace collection", "intimates for everyone"]
    );
    assert!(bundle
        .hero_texts()
        .contains(&"soft support for every day".to_string()));
    assert!(bundle.hero_texts().contains(&"shop now".to_string()));
    assert_eq!(bundle.nav_count(), 3);
}

#[test]
fn test_excluded_containers_are_skipped() {
    let page = html(
        r#"
        <div class="cc-banner"><nav><a>Accept all cookies</a></nav><h2>We value your privacy</h2></div>
        <nav><a>Lingerie</a></nav>
    "#,
    );

    let bundle = extractor().extract(&page, Some(&base()), &[".cc-banner".to_string()]);

    assert_eq!(bundle.nav_items(), &["lingerie"]);
    assert!(bundle.headings().is_empty());
}

#[test]
fn test_consent_dialogs_are_excluded_by_default() {
    let page = html(
        r#"<div id="onetrust-banner-sdk"><h2>Cookie preferences</h2></div><h2>Swimwear sale</h2>"#,
    );

    let bundle = extractor().extract(&page, None, &[]);
    assert_eq!(bundle.headings(), &["swimwear sale"]);
}

#[test]
fn test_images_are_resolved_filtered_and_capped() {
    let page = html(
        r#"
        <head><meta property="og:image" content="//cdn.example.com/og/hero.jpg"></head>
        <body>
            <img src="/static/logo.png" width="300" height="120">
            <img src="/icons/cart.png">
            <img src="data:image/gif;base64,R0lGOD">
            <img src="/img/tiny.jpg" width="40" height="40">
            <img src="/files/brand.svg">
            <img src="/products/bra-1.jpg" width="800" height="1000">
            <img data-src="/products/bra-2.jpg">
            <img srcset="/products/bra-3_320x.jpg 320w, /products/bra-3_1200x.jpg 1200w">
            <img src="/products/bra-4.jpg">
            <img src="/products/bra-5.jpg">
        </body>
    "#,
    );

    let bundle = extractor().extract(&page, Some(&base()), &[]);
    let images = bundle.image_urls();

    assert_eq!(images.len(), 4);
    assert_eq!(images[0], "https://cdn.example.com/og/hero.jpg");
    assert_eq!(images[1], "https://shop.example.com/products/bra-1.jpg");
    assert!(images.contains(&"https://shop.example.com/products/bra-2.jpg".to_string()));
    assert!(images.iter().all(|u| !u.contains("logo") && !u.ends_with(".svg")));
    assert!(images.iter().all(|u| !u.contains("tiny") && !u.contains("icons")));
}

#[test]
fn test_largest_srcset_candidate_is_used() {
    assert_eq!(
        largest_srcset_candidate("/a_320x.jpg 320w, /a_1200x.jpg 1200w, /a_640x.jpg 640w"),
        Some("/a_1200x.jpg")
    );
    assert_eq!(largest_srcset_candidate("/a.jpg 1x, /a@2x.jpg 2x"), Some("/a@2x.jpg"));
}

#[test]
fn test_size_variants_collapse_to_one_image() {
    let page = html(
        r#"
        <img src="/products/lace-bra_400x.jpg?v=12">
        <img src="/products/lace-bra_800x.jpg?v=12">
        <img src="/products/lace-bra.jpg">
        <img src="/products/lace-bra@2x.jpg">
    "#,
    );

    let bundle = extractor().extract(&page, Some(&base()), &[]);
    assert_eq!(bundle.image_count(), 1);
}

#[test]
fn test_near_duplicate_urls_collapse() {
    let page = html(
        r#"
        <img src="https://cdn.example.com/products/summer-bikini-top-black.jpg">
        <img src="https://cdn.example.com/products/summer-bikini-top-black1.jpg">
        <img src="https://cdn.example.com/products/winter-coat.jpg">
    "#,
    );

    let bundle = extractor().extract(&page, None, &[]);
    assert_eq!(bundle.image_count(), 2);
}

#[test]
fn test_silicone_is_not_mistaken_for_icon() {
    let page = html(r#"<img src="/products/silicone-nipple-covers.jpg">"#);
    let bundle = extractor().extract(&page, Some(&base()), &[]);
    assert_eq!(bundle.image_count(), 1);
}

#[test]
fn test_extraction_is_deterministic() {
    let page = html(
        r#"<nav><a>Bras</a><a>Briefs</a></nav><h1>Welcome</h1>
           <img src="/a.jpg"><img src="/b.jpg" width="900" height="900">"#,
    );
    let first = extractor().extract(&page, Some(&base()), &[]);
    let second = extractor().extract(&page, Some(&base()), &[]);
    assert_eq!(first, second);
}

#[test]
fn test_markdown_content() {
    let markdown = PageContent::Markdown(
        "# Lingerie & Sleepwear\n\
         [Bras](https://x.com/bras) | [Panties](https://x.com/panties) | [Go](/go)\n\
         ## Bestsellers\n\
         ![Lace bodysuit](https://x.com/products/bodysuit.jpg)\n\
         ![](https://x.com/assets/logo.png)\n"
            .to_string(),
    );

    let bundle = extractor().extract(&markdown, Some(&base()), &[]);

    assert_eq!(bundle.headings(), &["lingerie & sleepwear", "bestsellers"]);
    assert_eq!(bundle.nav_items(), &["bras", "panties"]);
    assert_eq!(bundle.image_urls(), &["https://x.com/products/bodysuit.jpg"]);
}

#[test]
fn test_empty_document_produces_empty_bundle() {
    let bundle = extractor().extract(&html(""), None, &[]);
    assert!(bundle.is_empty());
    assert!(bundle.is_sparse(5, 3));
}
