//! Social-platform URL classification shared by the place parser and the
//! email-extraction stage.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocialPlatform {
    Facebook,
    Instagram,
    LinkedIn,
    Pinterest,
    Tiktok,
    Twitter,
    Yelp,
    Youtube,
    Whatsapp,
}

/// Classify a URL by lowercased substring match. Returns None for anything
/// that is not a recognized platform link.
pub fn classify_social_url(href: &str) -> Option<SocialPlatform> {
    let l = href.to_lowercase();
    if l.contains("facebook.com") || l.contains("fb.com") {
        Some(SocialPlatform::Facebook)
    } else if l.contains("instagram.com") || l.contains("instagr.am") {
        Some(SocialPlatform::Instagram)
    } else if l.contains("linkedin.com") {
        Some(SocialPlatform::LinkedIn)
    } else if l.contains("pinterest.") {
        Some(SocialPlatform::Pinterest)
    } else if l.contains("tiktok.com") {
        Some(SocialPlatform::Tiktok)
    } else if l.contains("twitter.com") || l.contains("x.com") {
        Some(SocialPlatform::Twitter)
    } else if l.contains("yelp.com") {
        Some(SocialPlatform::Yelp)
    } else if l.contains("youtube.com") || l.contains("youtu.be") {
        Some(SocialPlatform::Youtube)
    } else if l.contains("wa.me") || l.contains("whatsapp.com") {
        Some(SocialPlatform::Whatsapp)
    } else {
        None
    }
}
